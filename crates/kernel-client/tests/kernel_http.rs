//! HTTP flows of the session controller against a mock service.

use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

use kernel_client::{
    ApiClient, ClientConfig, ClientError, ExecutionHandler, ExecutionMode, Kernel, KernelState, ResourceLimits,
    RunStatus,
};

const TOKEN: &str = "test-session-0001";

fn client_for(server: &MockServer) -> ApiClient {
    let config = ClientConfig::builder()
        .access_key("TESTESTSERSERESTSET")
        .secret_key("KJSAKDFJASKFDJASDFJSAFDJSJFSAJFSDF")
        .endpoint(server.uri())
        .build()
        .unwrap();
    ApiClient::new(config).unwrap()
}

async fn mount_create(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/v2/kernel/create"))
        .and(body_partial_json(json!({"lang": "python3", "clientSessionToken": TOKEN})))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"kernelId": "kernel-42"})))
        .mount(server)
        .await;
}

async fn created_kernel(server: &MockServer) -> Kernel {
    mount_create(server).await;
    Kernel::get_or_create(client_for(server), Some(TOKEN.to_string()), "python3")
        .await
        .unwrap()
}

fn result_body(status: &str, stdout: &str) -> Value {
    json!({"result": {"status": status, "console": [["stdout", stdout]], "files": []}})
}

fn json_body(request: &Request) -> Value {
    serde_json::from_slice(&request.body).unwrap()
}

async fn requests_to(server: &MockServer, http_method: &str, url_path: &str) -> Vec<Request> {
    server
        .received_requests()
        .await
        .unwrap()
        .into_iter()
        .filter(|r| r.method.as_str() == http_method && r.url.path() == url_path)
        .collect()
}

#[tokio::test]
async fn test_create_sends_token_and_limits() {
    let server = MockServer::start().await;
    mount_create(&server).await;

    let mut kernel = Kernel::new(client_for(&server), Some(TOKEN.to_string()), "python3")
        .unwrap()
        .with_resource_limits(ResourceLimits {
            max_mem: 512,
            timeout: 30,
        });
    kernel.create_if_not_exists().await.unwrap();

    assert_eq!(kernel.state(), KernelState::Created);
    assert_eq!(kernel.kernel_id(), Some("kernel-42"));
    assert_eq!(kernel.session_token(), TOKEN);

    let creates = requests_to(&server, "POST", "/v2/kernel/create").await;
    assert_eq!(creates.len(), 1);
    assert_eq!(
        json_body(&creates[0]),
        json!({
            "lang": "python3",
            "clientSessionToken": TOKEN,
            "resourceLimits": {"maxMem": 512, "timeout": 30}
        })
    );
}

#[tokio::test]
async fn test_create_without_kernel_id_is_decode_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/kernel/create"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"created": true})))
        .mount(&server)
        .await;

    let mut kernel = Kernel::new(client_for(&server), None, "python3").unwrap();
    let err = kernel.create_if_not_exists().await.unwrap_err();
    assert!(matches!(err, ClientError::DecodeFailure(_)));
    assert_eq!(kernel.state(), KernelState::Uninitialized);
}

#[tokio::test]
async fn test_waiting_input_then_finished_reuses_run_id() {
    let server = MockServer::start().await;
    let mut kernel = created_kernel(&server).await;
    let execute_path = format!("/v2/kernel/{}", TOKEN);

    Mock::given(method("POST"))
        .and(path(execute_path.as_str()))
        .and(body_partial_json(json!({"mode": "batch", "code": ""})))
        .respond_with(ResponseTemplate::new(200).set_body_json(result_body("waiting-input", "name? ")))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(execute_path.as_str()))
        .and(body_partial_json(json!({"mode": "input", "code": "alice"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(result_body("finished", "hello alice\n")))
        .expect(1)
        .mount(&server)
        .await;

    let mut seen = Vec::new();
    let mut input: VecDeque<String> = VecDeque::from(vec!["alice".to_string()]);
    let result = {
        let mut handler = ExecutionHandler::new(|r| seen.push((r.status(), r.stdout().to_string())));
        kernel
            .run(
                ExecutionMode::Batch,
                "",
                Some(json!({"build": "*", "exec": "python main.py"})),
                &mut input,
                &mut handler,
            )
            .await
            .unwrap()
    };

    assert!(result.is_finished());
    assert_eq!(
        seen,
        vec![
            (RunStatus::WaitingInput, "name? ".to_string()),
            (RunStatus::Finished, "hello alice\n".to_string()),
        ]
    );
    assert_eq!(kernel.state(), KernelState::Created);

    let executes = requests_to(&server, "POST", &execute_path).await;
    assert_eq!(executes.len(), 2);
    let first = json_body(&executes[0]);
    let second = json_body(&executes[1]);
    assert_eq!(first["options"], json!({"build": "*", "exec": "python main.py"}));
    assert!(second.get("options").is_none());
    assert_eq!(first["runId"], second["runId"]);
    assert_eq!(first["runId"].as_str().unwrap().len(), 36);
    assert_eq!(kernel.run_id(), first["runId"].as_str());
}

#[tokio::test]
async fn test_continued_chunks_are_requested_until_finished() {
    let server = MockServer::start().await;
    let mut kernel = created_kernel(&server).await;
    let execute_path = format!("/v2/kernel/{}", TOKEN);

    Mock::given(method("POST"))
        .and(path(execute_path.as_str()))
        .and(body_partial_json(json!({"mode": "query"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(result_body("continued", "1\n")))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(execute_path.as_str()))
        .and(body_partial_json(json!({"mode": "continue", "code": ""})))
        .respond_with(ResponseTemplate::new(200).set_body_json(result_body("finished", "2\n")))
        .mount(&server)
        .await;

    let mut output = String::new();
    {
        let mut handler = ExecutionHandler::new(|r| output.push_str(r.stdout()));
        kernel
            .run(
                ExecutionMode::Query,
                "for i in (1, 2): print(i)",
                None,
                &mut VecDeque::<String>::new(),
                &mut handler,
            )
            .await
            .unwrap();
    }
    assert_eq!(output, "1\n2\n");

    // The session stays usable for another execution.
    kernel
        .run(
            ExecutionMode::Query,
            "print(3)",
            None,
            &mut VecDeque::<String>::new(),
            &mut ExecutionHandler::default(),
        )
        .await
        .unwrap();
    assert_eq!(requests_to(&server, "POST", &execute_path).await.len(), 4);
}

#[tokio::test]
async fn test_exhausted_input_is_invalid_parameters() {
    let server = MockServer::start().await;
    let mut kernel = created_kernel(&server).await;

    Mock::given(method("POST"))
        .and(path(format!("/v2/kernel/{}", TOKEN).as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(result_body("waiting-input", "? ")))
        .expect(1)
        .mount(&server)
        .await;

    let mut errors = Vec::new();
    let err = {
        let mut handler = ExecutionHandler::default().on_error(|e| errors.push(e.to_string()));
        kernel
            .run(
                ExecutionMode::Query,
                "input()",
                None,
                &mut VecDeque::<String>::new(),
                &mut handler,
            )
            .await
            .unwrap_err()
    };
    assert!(matches!(err, ClientError::InvalidParameters(_)));
    assert_eq!(errors.len(), 1);
    assert_eq!(kernel.state(), KernelState::Running);
}

#[tokio::test]
async fn test_destroy_is_terminal_and_offline() {
    let server = MockServer::start().await;
    let mut kernel = created_kernel(&server).await;

    Mock::given(method("DELETE"))
        .and(path(format!("/v2/kernel/{}", TOKEN).as_str()))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    kernel.destroy().await.unwrap();
    assert_eq!(kernel.state(), KernelState::Destroyed);
    let before = server.received_requests().await.unwrap().len();

    let err = kernel
        .execute(ExecutionMode::Query, "run-00000001", "print(1)", None)
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::SessionDestroyed(ref t) if t == TOKEN));
    assert!(matches!(kernel.destroy().await, Err(ClientError::SessionDestroyed(_))));
    assert!(matches!(kernel.interrupt().await, Err(ClientError::SessionDestroyed(_))));
    assert!(matches!(kernel.refresh().await, Err(ClientError::SessionDestroyed(_))));
    assert!(matches!(kernel.fetch_type().await, Err(ClientError::SessionDestroyed(_))));
    assert!(matches!(
        kernel.upload(&BTreeMap::new()).await,
        Err(ClientError::SessionDestroyed(_))
    ));
    assert!(matches!(
        kernel
            .stream_run(
                ExecutionMode::Query,
                "print(1)",
                None,
                &mut VecDeque::<String>::new(),
                &mut ExecutionHandler::default(),
            )
            .await,
        Err(ClientError::SessionDestroyed(_))
    ));

    assert_eq!(server.received_requests().await.unwrap().len(), before);
}

#[tokio::test]
async fn test_destroy_of_expired_session_still_terminal() {
    let server = MockServer::start().await;
    let mut kernel = created_kernel(&server).await;

    Mock::given(method("DELETE"))
        .and(path(format!("/v2/kernel/{}", TOKEN).as_str()))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({"title": "No such kernel"})))
        .mount(&server)
        .await;

    kernel.destroy().await.unwrap();
    assert_eq!(kernel.state(), KernelState::Destroyed);
}

#[tokio::test]
async fn test_session_calls_hit_their_endpoints() {
    let server = MockServer::start().await;
    let mut kernel = created_kernel(&server).await;
    let session_path = format!("/v2/kernel/{}", TOKEN);

    Mock::given(method("POST"))
        .and(path(format!("{}/interrupt", session_path).as_str()))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path(session_path.as_str()))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(session_path.as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"lang": "python3", "age": 10})))
        .expect(2)
        .mount(&server)
        .await;

    kernel.interrupt().await.unwrap();
    kernel.refresh().await.unwrap();
    assert_eq!(kernel.fetch_type().await.unwrap(), "python3");
    assert!(kernel.verify_type().await.unwrap());

    // GET is signed but never carries a body.
    let gets = requests_to(&server, "GET", &session_path).await;
    assert!(gets.iter().all(|r| r.body.is_empty()));
}

#[tokio::test]
async fn test_verify_type_mismatch() {
    let server = MockServer::start().await;
    let kernel = created_kernel(&server).await;

    Mock::given(method("GET"))
        .and(path(format!("/v2/kernel/{}", TOKEN).as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"lang": "r-base"})))
        .mount(&server)
        .await;

    assert!(!kernel.verify_type().await.unwrap());
}

#[tokio::test]
async fn test_upload_sends_one_src_part_per_file() {
    let server = MockServer::start().await;
    let kernel = created_kernel(&server).await;
    let upload_path = format!("/v2/kernel/{}/upload", TOKEN);

    Mock::given(method("POST"))
        .and(path(upload_path.as_str()))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let main_py = dir.path().join("main.py");
    let util_py = dir.path().join("util.py");
    std::fs::write(&main_py, "import lib.util\nprint(input())\n").unwrap();
    std::fs::write(&util_py, "X = 1\n").unwrap();

    let mut files = BTreeMap::new();
    files.insert("main.py".to_string(), main_py);
    files.insert("lib/util.py".to_string(), util_py);
    kernel.upload(&files).await.unwrap();

    let uploads = requests_to(&server, "POST", &upload_path).await;
    assert_eq!(uploads.len(), 1);
    let content_type = uploads[0].headers.get("content-type").unwrap().to_str().unwrap();
    assert!(content_type.starts_with("multipart/form-data"));

    let body = String::from_utf8_lossy(&uploads[0].body);
    assert_eq!(body.matches("name=\"src\"").count(), 2);
    assert!(body.contains("filename=\"main.py\""));
    assert!(body.contains("filename=\"lib/util.py\""));
    assert!(body.contains("print(input())"));
}

#[tokio::test]
async fn test_every_request_is_signed() {
    let server = MockServer::start().await;
    let client = client_for(&server);
    mount_create(&server).await;
    Mock::given(method("POST"))
        .and(path(format!("/v2/kernel/{}", TOKEN).as_str()))
        .and(header("x-backendai-version", "v2.20170315"))
        .respond_with(ResponseTemplate::new(200).set_body_json(result_body("finished", "")))
        .mount(&server)
        .await;

    let mut kernel = Kernel::get_or_create(client.clone(), Some(TOKEN.to_string()), "python3")
        .await
        .unwrap();
    kernel
        .execute(ExecutionMode::Query, "run-00000001", "print(1)", None)
        .await
        .unwrap();

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);
    for request in &requests {
        let date = request.headers.get("date").unwrap().to_str().unwrap();
        let timestamp: DateTime<Utc> = DateTime::parse_from_rfc3339(date).unwrap().with_timezone(&Utc);
        let expected = client
            .signer()
            .sign(
                request.method.as_str(),
                request.url.path(),
                &timestamp,
                "application/json",
                &request.body,
            )
            .unwrap();
        let authorization = request.headers.get("authorization").unwrap().to_str().unwrap();
        assert_eq!(
            authorization,
            format!("BackendAI signMethod=HMAC-SHA256, credential={}", expected)
        );
    }
}

#[tokio::test]
async fn test_failures_are_classified() {
    let server = MockServer::start().await;
    let mut kernel = created_kernel(&server).await;
    let session_path = format!("/v2/kernel/{}", TOKEN);

    Mock::given(method("POST"))
        .and(path(session_path.as_str()))
        .and(body_partial_json(json!({"code": "expired"})))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({"title": "Kernel not found"})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(session_path.as_str()))
        .and(body_partial_json(json!({"code": "busy"})))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(session_path.as_str()))
        .and(body_partial_json(json!({"code": "limit"})))
        .respond_with(ResponseTemplate::new(429).set_body_json(json!({"title": "Too many sessions"})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(session_path.as_str()))
        .and(body_partial_json(json!({"code": "garbled"})))
        .respond_with(ResponseTemplate::new(200).set_body_raw("{\"result\": ", "application/json"))
        .mount(&server)
        .await;

    let run_id = "run-00000001";
    let err = kernel.execute(ExecutionMode::Query, run_id, "expired", None).await.unwrap_err();
    assert!(matches!(err, ClientError::KernelExpired(ref m) if m == "Kernel not found"));
    assert!(err.requires_new_session());

    let err = kernel.execute(ExecutionMode::Query, run_id, "busy", None).await.unwrap_err();
    assert!(matches!(err, ClientError::ServiceUnavailable { status: 503, ref message } if message == "maintenance"));
    assert!(err.is_retryable());

    let err = kernel.execute(ExecutionMode::Query, run_id, "limit", None).await.unwrap_err();
    assert!(matches!(err, ClientError::ResourceLimitExceeded { status: 429, ref message } if message == "Too many sessions"));
    assert_eq!(err.status(), Some(429));

    let err = kernel.execute(ExecutionMode::Query, run_id, "garbled", None).await.unwrap_err();
    assert!(matches!(err, ClientError::DecodeFailure(_)));
}

#[tokio::test]
async fn test_unauthorized_create() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/kernel/create"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({"title": "Signature mismatch"})))
        .mount(&server)
        .await;

    let err = Kernel::get_or_create(client_for(&server), None, "python3")
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::AuthorizationFailure(ref m) if m == "Signature mismatch"));
    assert_eq!(err.status(), Some(401));
}
