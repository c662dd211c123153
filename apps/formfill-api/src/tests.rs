//! HTTP endpoint tests using axum-test against an in-memory database

#[cfg(test)]
mod http_endpoint_tests {
    use std::sync::Arc;

    use axum::http::{header, StatusCode};
    use axum_test::TestServer;
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
    use formfill_core::{ExportFormat, FormFillError, FormatConverter};
    use lopdf::content::Content;
    use lopdf::{Dictionary, Document, Object, Stream};
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};
    use tempfile::TempDir;

    use crate::api::router;
    use crate::state::{AppState, Config};

    fn create_test_pdf(num_pages: u32) -> Vec<u8> {
        let mut doc = Document::with_version("1.7");
        let pages_id = doc.new_object_id();

        let mut page_ids = Vec::new();
        for _ in 0..num_pages {
            let content_id = doc.add_object(Stream::new(
                Dictionary::new(),
                b"0 0 0 RG 36 36 540 720 re S".to_vec(),
            ));
            let page_id = doc.add_object(Dictionary::from_iter(vec![
                ("Type", Object::Name(b"Page".to_vec())),
                ("Parent", Object::Reference(pages_id)),
                (
                    "MediaBox",
                    Object::Array(vec![
                        Object::Integer(0),
                        Object::Integer(0),
                        Object::Integer(612),
                        Object::Integer(792),
                    ]),
                ),
                ("Contents", Object::Reference(content_id)),
            ]));
            page_ids.push(page_id);
        }

        let pages = Dictionary::from_iter(vec![
            ("Type", Object::Name(b"Pages".to_vec())),
            ("Count", Object::Integer(num_pages as i64)),
            (
                "Kids",
                Object::Array(page_ids.iter().map(|id| Object::Reference(*id)).collect()),
            ),
        ]);
        doc.objects.insert(pages_id, Object::Dictionary(pages));

        let catalog_id = doc.add_object(Dictionary::from_iter(vec![
            ("Type", Object::Name(b"Catalog".to_vec())),
            ("Pages", Object::Reference(pages_id)),
        ]));
        doc.trailer.set("Root", Object::Reference(catalog_id));

        let mut buffer = Vec::new();
        doc.save_to(&mut buffer).unwrap();
        buffer
    }

    /// Converter that produces fixed bytes, standing in for LibreOffice
    struct StaticConverter;

    impl FormatConverter for StaticConverter {
        fn convert(&self, pdf: &[u8], target: ExportFormat) -> Result<Vec<u8>, FormFillError> {
            match target {
                ExportFormat::Pdf => Ok(pdf.to_vec()),
                ExportFormat::Docx => Ok(b"PK-docx".to_vec()),
            }
        }
    }

    struct MissingConverter;

    impl FormatConverter for MissingConverter {
        fn convert(&self, _pdf: &[u8], _target: ExportFormat) -> Result<Vec<u8>, FormFillError> {
            Err(FormFillError::Conversion("soffice not found".into()))
        }
    }

    fn test_config(dir: &TempDir, database_url: &str) -> Config {
        Config::new(Some(dir.path().to_path_buf()), Some(database_url.to_string()))
    }

    async fn create_test_server_with(converter: Arc<dyn FormatConverter>) -> (TestServer, TempDir) {
        let dir = TempDir::new().unwrap();
        let mut state = AppState::new(&test_config(&dir, "sqlite::memory:"))
            .await
            .unwrap();
        state.converter = converter;
        let server = TestServer::new(router(Arc::new(state))).unwrap();
        (server, dir)
    }

    async fn create_test_server() -> (TestServer, TempDir) {
        create_test_server_with(Arc::new(StaticConverter)).await
    }

    async fn upload(server: &TestServer, pages: u32) -> i64 {
        let response = server
            .post("/api/templates/upload")
            .json(&json!({
                "filename": "intake.pdf",
                "pdfBase64": BASE64.encode(create_test_pdf(pages)),
            }))
            .await;
        response.assert_status(StatusCode::CREATED);
        response.json::<Value>()["id"].as_i64().unwrap()
    }

    async fn bulk_boxes(server: &TestServer, template_id: i64, boxes: Value) -> Vec<i64> {
        let response = server
            .post(&format!("/api/templates/{}/boxes/bulk", template_id))
            .json(&json!({ "boxes": boxes }))
            .await;
        response.assert_status(StatusCode::CREATED);
        response.json::<Value>()["boxes"]
            .as_array()
            .unwrap()
            .iter()
            .map(|b| b["id"].as_i64().unwrap())
            .collect()
    }

    fn error_code(body: &Value) -> &str {
        body["code"].as_str().unwrap()
    }

    /// `(text, x, y)` of every Tj on page 1
    fn page_text(bytes: &[u8]) -> Vec<(String, f64, f64)> {
        let doc = Document::load_mem(bytes).unwrap();
        let page_id = doc.get_pages()[&1];
        let content = Content::decode(&doc.get_page_content(page_id).unwrap()).unwrap();
        let mut pos = (0.0, 0.0);
        let mut out = Vec::new();
        for op in content.operations {
            match op.operator.as_str() {
                "Td" => {
                    pos = (
                        op.operands[0].as_float().unwrap() as f64,
                        op.operands[1].as_float().unwrap() as f64,
                    )
                }
                "Tj" => out.push((
                    String::from_utf8(op.operands[0].as_str().unwrap().to_vec()).unwrap(),
                    pos.0,
                    pos.1,
                )),
                _ => {}
            }
        }
        out
    }

    #[tokio::test]
    async fn test_health_returns_200() {
        let (server, _dir) = create_test_server().await;
        let response = server.get("/health").await;
        response.assert_status_ok();

        let json = response.json::<Value>();
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["service"], "formfill-api");
    }

    #[tokio::test]
    async fn test_upload_and_fetch_template() {
        let (server, _dir) = create_test_server().await;
        let id = upload(&server, 3).await;

        let json = server
            .get(&format!("/api/templates/{}", id))
            .await
            .json::<Value>();
        assert_eq!(json["name"], "intake");
        assert_eq!(json["pageCount"], 3);
        assert!(json.get("filePath").is_none());

        let list = server.get("/api/templates").await.json::<Value>();
        assert_eq!(list["count"], 1);

        let pdf = server.get(&format!("/api/templates/{}/pdf", id)).await;
        pdf.assert_status_ok();
        assert_eq!(pdf.header(header::CONTENT_TYPE), "application/pdf");
        assert!(pdf.as_bytes().starts_with(b"%PDF"));
    }

    #[tokio::test]
    async fn test_upload_rejects_bad_input() {
        let (server, _dir) = create_test_server().await;

        let response = server
            .post("/api/templates/upload")
            .json(&json!({ "filename": "a.pdf", "pdfBase64": "%%%" }))
            .await;
        response.assert_status_bad_request();
        assert_eq!(error_code(&response.json::<Value>()), "INVALID_REQUEST");

        let response = server
            .post("/api/templates/upload")
            .json(&json!({
                "filename": "a.pdf",
                "pdfBase64": BASE64.encode(b"plain text, not a document"),
            }))
            .await;
        response.assert_status(StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(error_code(&response.json::<Value>()), "DOCUMENT_ERROR");

        let response = server
            .post("/api/templates/upload")
            .json(&json!({ "pdfBase64": "" }))
            .await;
        response.assert_status_bad_request();
        assert_eq!(error_code(&response.json::<Value>()), "INVALID_REQUEST");
    }

    #[tokio::test]
    async fn test_rejected_upload_leaves_no_file() {
        let (server, dir) = create_test_server().await;

        // Valid document, blank filename: refused after the bytes were written
        let response = server
            .post("/api/templates/upload")
            .json(&json!({
                "filename": "   ",
                "pdfBase64": BASE64.encode(create_test_pdf(1)),
            }))
            .await;
        response.assert_status_bad_request();
        assert_eq!(error_code(&response.json::<Value>()), "VALIDATION_ERROR");

        let leftover = std::fs::read_dir(dir.path().join("uploads")).unwrap().count();
        assert_eq!(leftover, 0);
    }

    #[tokio::test]
    async fn test_bulk_boxes_are_all_or_nothing() {
        let (server, _dir) = create_test_server().await;
        let id = upload(&server, 2).await;

        let response = server
            .post(&format!("/api/templates/{}/boxes/bulk", id))
            .json(&json!({ "boxes": [
                { "page": 1, "x": 10, "y": 10, "w": 80, "h": 20 },
                { "page": 3, "x": 10, "y": 40, "w": 80, "h": 20 },
            ]}))
            .await;
        response.assert_status_bad_request();
        assert_eq!(error_code(&response.json::<Value>()), "VALIDATION_ERROR");

        let boxes = server
            .get(&format!("/api/templates/{}/boxes", id))
            .await
            .json::<Value>();
        assert_eq!(boxes["count"], 0);

        bulk_boxes(
            &server,
            id,
            json!([
                { "page": 1, "x": 10, "y": 10, "width": 80, "height": 20 },
                { "page": 2, "x": 10, "y": 40, "w": 80, "h": 20 },
            ]),
        )
        .await;

        let page2 = server
            .get(&format!("/api/templates/{}/boxes", id))
            .add_query_param("page", 2)
            .await
            .json::<Value>();
        assert_eq!(page2["count"], 1);
        assert_eq!(page2["boxes"][0]["y"], 40.0);
    }

    #[tokio::test]
    async fn test_field_exclusivity_and_cascade() {
        let (server, _dir) = create_test_server().await;
        let id = upload(&server, 1).await;
        let boxes = bulk_boxes(
            &server,
            id,
            json!([
                { "page": 1, "x": 10, "y": 10, "w": 80, "h": 20 },
                { "page": 1, "x": 10, "y": 40, "w": 80, "h": 20 },
            ]),
        )
        .await;

        let response = server
            .post(&format!("/api/templates/{}/fields", id))
            .json(&json!({ "fieldName": "name", "boxIds": [boxes[0]] }))
            .await;
        response.assert_status(StatusCode::CREATED);
        let field = response.json::<Value>();
        assert_eq!(field["label"], "name");
        assert_eq!(field["fontSize"], 10.0);
        assert_eq!(field["valueType"], "text");

        // Same name again
        let response = server
            .post(&format!("/api/templates/{}/fields", id))
            .json(&json!({ "name": "name", "boxIds": [boxes[1]] }))
            .await;
        response.assert_status_bad_request();

        // Box already mapped
        let response = server
            .post(&format!("/api/templates/{}/fields", id))
            .json(&json!({ "name": "other", "boxIds": [boxes[0]] }))
            .await;
        response.assert_status(StatusCode::CONFLICT);
        assert_eq!(error_code(&response.json::<Value>()), "CONFLICT");

        server
            .post(&format!("/api/boxes/{}/select", boxes[0]))
            .await
            .assert_status(StatusCode::CONFLICT);
        server
            .delete(&format!("/api/boxes/{}", boxes[0]))
            .await
            .assert_status(StatusCode::CONFLICT);
        server
            .patch(&format!("/api/boxes/{}", boxes[0]))
            .json(&json!({ "x": 50 }))
            .await
            .assert_status(StatusCode::CONFLICT);

        let field_id = field["id"].as_i64().unwrap();
        server
            .delete(&format!("/api/fields/{}", field_id))
            .await
            .assert_status_ok();
        server
            .post(&format!("/api/boxes/{}/select", boxes[0]))
            .await
            .assert_status_ok();
        server
            .get(&format!("/api/fields/{}", field_id))
            .await
            .assert_status_not_found();
    }

    #[tokio::test]
    async fn test_update_field_and_box() {
        let (server, _dir) = create_test_server().await;
        let id = upload(&server, 1).await;
        let boxes = bulk_boxes(
            &server,
            id,
            json!([
                { "page": 1, "x": 10, "y": 10, "w": 80, "h": 20 },
                { "page": 1, "x": 10, "y": 40, "w": 80, "h": 20 },
            ]),
        )
        .await;

        let moved = server
            .patch(&format!("/api/boxes/{}", boxes[1]))
            .json(&json!({ "x": 30, "h": 25 }))
            .await;
        moved.assert_status_ok();
        let moved = moved.json::<Value>();
        assert_eq!(moved["x"], 30.0);
        assert_eq!(moved["y"], 40.0);
        assert_eq!(moved["height"], 25.0);

        server
            .patch(&format!("/api/boxes/{}", boxes[1]))
            .json(&json!({}))
            .await
            .assert_status_bad_request();

        let field = server
            .post(&format!("/api/templates/{}/fields", id))
            .json(&json!({ "name": "email", "fieldType": "email", "boxIds": [boxes[0]] }))
            .await
            .json::<Value>();
        let updated = server
            .patch(&format!("/api/fields/{}", field["id"]))
            .json(&json!({ "label": "E-mail", "fontSize": 14 }))
            .await;
        updated.assert_status_ok();
        let updated = updated.json::<Value>();
        assert_eq!(updated["label"], "E-mail");
        assert_eq!(updated["fontSize"], 14.0);
        assert_eq!(updated["valueType"], "email");
        assert_eq!(updated["name"], "email");

        server
            .patch(&format!("/api/fields/{}", field["id"]))
            .json(&json!({ "fontSize": 0 }))
            .await
            .assert_status_bad_request();
    }

    #[tokio::test]
    async fn test_rejected_box_update_changes_nothing() {
        let (server, _dir) = create_test_server().await;
        let id = upload(&server, 1).await;
        let boxes = bulk_boxes(
            &server,
            id,
            json!([{ "page": 1, "x": 10, "y": 10, "w": 80, "h": 20 }]),
        )
        .await;

        // Valid position, invalid size: neither is applied
        let response = server
            .patch(&format!("/api/boxes/{}", boxes[0]))
            .json(&json!({ "x": 300, "width": 0 }))
            .await;
        response.assert_status_bad_request();
        assert_eq!(error_code(&response.json::<Value>()), "VALIDATION_ERROR");

        let stored = server
            .get(&format!("/api/boxes/{}", boxes[0]))
            .await
            .json::<Value>();
        assert_eq!(stored["x"], 10.0);
        assert_eq!(stored["y"], 10.0);
        assert_eq!(stored["width"], 80.0);
        assert_eq!(stored["height"], 20.0);
    }

    #[tokio::test]
    async fn test_uniform_height() {
        let (server, _dir) = create_test_server().await;
        let id = upload(&server, 1).await;
        let boxes = bulk_boxes(
            &server,
            id,
            json!([
                { "page": 1, "x": 10, "y": 10, "w": 80, "h": 20 },
                { "page": 1, "x": 10, "y": 40, "w": 80, "h": 30 },
            ]),
        )
        .await;
        server
            .post(&format!("/api/templates/{}/fields", id))
            .json(&json!({ "name": "mapped", "boxIds": [boxes[0]] }))
            .await
            .assert_status(StatusCode::CREATED);

        server
            .post(&format!("/api/templates/{}/uniform-height/apply", id))
            .await
            .assert_status_bad_request();

        let response = server
            .put(&format!("/api/templates/{}/uniform-height", id))
            .json(&json!({ "height": 18 }))
            .await;
        response.assert_status_ok();
        assert_eq!(response.json::<Value>()["height"], 18.0);

        // New boxes follow the uniform height even without one of their own
        let created = server
            .post(&format!("/api/templates/{}/boxes", id))
            .json(&json!({ "page": 1, "x": 10, "y": 90, "w": 50 }))
            .await;
        created.assert_status(StatusCode::CREATED);
        assert_eq!(created.json::<Value>()["height"], 18.0);

        let applied = server
            .post(&format!("/api/templates/{}/uniform-height/apply", id))
            .await
            .json::<Value>();
        assert_eq!(applied["count"], 1);
        assert_eq!(applied["boxes"][0]["id"], boxes[1]);

        let mapped = server
            .get(&format!("/api/boxes/{}", boxes[0]))
            .await
            .json::<Value>();
        assert_eq!(mapped["height"], 20.0);
    }

    #[tokio::test]
    async fn test_export_pdf_draws_values() {
        let (server, _dir) = create_test_server().await;
        let id = upload(&server, 1).await;
        let boxes = bulk_boxes(
            &server,
            id,
            json!([{ "page": 1, "x": 150, "y": 200, "w": 50, "h": 30 }]),
        )
        .await;
        server
            .post(&format!("/api/templates/{}/fields", id))
            .json(&json!({ "name": "first", "fontSize": 12, "boxIds": boxes }))
            .await
            .assert_status(StatusCode::CREATED);

        let resolved = server
            .get(&format!("/api/templates/{}/fields/resolved", id))
            .await
            .json::<Value>();
        assert_eq!(resolved["fields"][0]["boxes"][0]["x"], 150.0);

        let response = server
            .post("/api/export/pdf")
            .json(&json!({ "templateId": id, "fieldData": { "first": "Bob", "other": "x" } }))
            .await;
        response.assert_status_ok();
        assert_eq!(response.header(header::CONTENT_TYPE), "application/pdf");
        let disposition = response.header(header::CONTENT_DISPOSITION);
        let disposition = disposition.to_str().unwrap();
        assert!(disposition.starts_with("attachment; filename=\"filled-"));
        assert!(disposition.ends_with(".pdf\""));

        let text = page_text(response.as_bytes());
        assert_eq!(text.len(), 1);
        assert_eq!(text[0].0, "Bob");
        // Helvetica "Bob" = 667+556+556 = 1779 units
        let width = 1779.0 * 12.0 / 1000.0;
        assert!((text[0].1 - (150.0 + (50.0 - width) / 2.0)).abs() < 1e-3);
        assert!((text[0].2 - 572.8).abs() < 1e-3);
    }

    #[tokio::test]
    async fn test_export_docx() {
        let (server, _dir) = create_test_server().await;
        let id = upload(&server, 1).await;

        let response = server
            .post("/api/export/docx")
            .json(&json!({ "templateId": id, "values": {} }))
            .await;
        response.assert_status_ok();
        assert_eq!(
            response.header(header::CONTENT_TYPE),
            ExportFormat::Docx.mime_type()
        );
        assert_eq!(response.as_bytes().as_ref(), b"PK-docx");
    }

    #[tokio::test]
    async fn test_export_reports_conversion_failure() {
        let (server, _dir) = create_test_server_with(Arc::new(MissingConverter)).await;
        let id = upload(&server, 1).await;

        let response = server
            .post("/api/export/docx")
            .json(&json!({ "templateId": id, "values": {} }))
            .await;
        response.assert_status(StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(error_code(&response.json::<Value>()), "CONVERSION_ERROR");
    }

    #[tokio::test]
    async fn test_export_rejects_unknown_format_and_template() {
        let (server, _dir) = create_test_server().await;

        server
            .post("/api/export/odt")
            .json(&json!({ "templateId": 1, "values": {} }))
            .await
            .assert_status_bad_request();
        server
            .post("/api/export/pdf")
            .json(&json!({ "templateId": 99, "values": {} }))
            .await
            .assert_status_not_found();

        let info = server.get("/api/export/info").await.json::<Value>();
        assert_eq!(info["formats"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_delete_template_cascades() {
        let (server, _dir) = create_test_server().await;
        let id = upload(&server, 1).await;
        let boxes = bulk_boxes(
            &server,
            id,
            json!([{ "page": 1, "x": 10, "y": 10, "w": 80, "h": 20 }]),
        )
        .await;

        server
            .delete(&format!("/api/templates/{}", id))
            .await
            .assert_status_ok();
        server
            .get(&format!("/api/templates/{}", id))
            .await
            .assert_status_not_found();
        server
            .get(&format!("/api/boxes/{}", boxes[0]))
            .await
            .assert_status_not_found();
        server
            .delete(&format!("/api/templates/{}", id))
            .await
            .assert_status_not_found();
    }

    #[tokio::test]
    async fn test_delete_template_with_missing_file() {
        let (server, dir) = create_test_server().await;
        let id = upload(&server, 1).await;
        let boxes = bulk_boxes(
            &server,
            id,
            json!([{ "page": 1, "x": 10, "y": 10, "w": 80, "h": 20 }]),
        )
        .await;

        let uploads: Vec<_> = std::fs::read_dir(dir.path().join("uploads"))
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .collect();
        assert_eq!(uploads.len(), 1);
        std::fs::remove_file(&uploads[0]).unwrap();

        let response = server.delete(&format!("/api/templates/{}", id)).await;
        response.assert_status_ok();
        assert_eq!(response.json::<Value>()["id"], id);

        server
            .get(&format!("/api/templates/{}", id))
            .await
            .assert_status_not_found();
        server
            .get(&format!("/api/boxes/{}", boxes[0]))
            .await
            .assert_status_not_found();
        server
            .get(&format!("/api/templates/{}/fields", id))
            .await
            .assert_status_not_found();
    }

    #[tokio::test]
    async fn test_malformed_json_uses_error_body() {
        let (server, _dir) = create_test_server().await;
        let id = upload(&server, 1).await;

        let response = server
            .post(&format!("/api/templates/{}/boxes", id))
            .json(&json!({ "page": "first" }))
            .await;
        response.assert_status_bad_request();
        let body = response.json::<Value>();
        assert_eq!(body["success"], false);
        assert_eq!(error_code(&body), "INVALID_REQUEST");
    }

    #[tokio::test]
    async fn test_state_survives_restart() {
        let dir = TempDir::new().unwrap();
        let url = format!("sqlite:{}/formfill.db?mode=rwc", dir.path().display());
        let config = test_config(&dir, &url);

        let (template_id, box_ids) = {
            let state = Arc::new(AppState::new(&config).await.unwrap());
            let server = TestServer::new(router(Arc::clone(&state))).unwrap();
            let id = upload(&server, 2).await;
            let boxes = bulk_boxes(
                &server,
                id,
                json!([
                    { "page": 1, "x": 10, "y": 10, "w": 80, "h": 20 },
                    { "page": 2, "x": 20, "y": 30, "w": 60, "h": 20 },
                ]),
            )
            .await;
            server
                .post(&format!("/api/templates/{}/fields", id))
                .json(&json!({ "name": "split", "boxIds": [boxes[1], boxes[0]] }))
                .await
                .assert_status(StatusCode::CREATED);
            drop(server);
            state.db.close().await;
            (id, boxes)
        };

        let state = AppState::new(&config).await.unwrap();
        let server = TestServer::new(router(Arc::new(state))).unwrap();

        let fields = server
            .get(&format!("/api/templates/{}/fields", template_id))
            .await
            .json::<Value>();
        assert_eq!(fields["count"], 1);
        assert_eq!(fields["fields"][0]["boxIds"], json!([box_ids[1], box_ids[0]]));

        // Ids keep counting after the restored ones
        let created = bulk_boxes(
            &server,
            template_id,
            json!([{ "page": 1, "x": 10, "y": 60, "w": 80, "h": 20 }]),
        )
        .await;
        assert!(created[0] > box_ids[1]);

        server
            .get(&format!("/api/templates/{}/pdf", template_id))
            .await
            .assert_status_ok();
    }
}
