use serde_json::{json, Value};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_registrard");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn registrard");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn send(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: Value,
    auth: Value,
) -> Value {
    let mut payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    if !auth.is_null() {
        payload["auth"] = auth;
    }
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: Value,
    auth: Value,
) -> Value {
    let value = send(stdin, reader, id, method, params, auth);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn request_err(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: Value,
    auth: Value,
) -> String {
    let value = send(stdin, reader, id, method, params, auth);
    assert!(
        !value.get("ok").and_then(|v| v.as_bool()).unwrap_or(true),
        "{} unexpectedly succeeded: {}",
        method,
        value
    );
    value["error"]["code"].as_str().expect("error code").to_string()
}

fn staff(org: &str) -> Value {
    json!({ "id": "user-admin", "role": "admin", "organization": org })
}

#[test]
fn page_and_total_stay_consistent_across_pages() {
    let workspace = temp_dir("registrard-attendance-pagination");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let org = "org-a";

    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
        json!(null),
    );
    let dep = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "directory.addDepartment",
        json!({ "name": "Science" }),
        staff(org),
    );
    let student = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "directory.addStudent",
        json!({
            "name": "Rahim Uddin",
            "email": "rahim@example.com",
            "roll": "101",
            "registrationNo": "REG-101",
            "class": 7,
            "session": 2024,
            "departmentId": dep["id"],
        }),
        staff(org),
    );

    for day in 1..=25 {
        request_ok(
            &mut stdin,
            &mut reader,
            &format!("att-{}", day),
            "attendance.create",
            json!({
                "studentId": student["id"],
                "status": "present",
                "date": format!("2025-01-{:02}", day),
            }),
            staff(org),
        );
    }

    // data.len == min(limit, total - (page-1)*limit) clamped at 0.
    for (page, expected_len) in [(1, 10), (2, 10), (3, 5), (4, 0)] {
        let res = request_ok(
            &mut stdin,
            &mut reader,
            &format!("list-{}", page),
            "attendance.list",
            json!({ "page": page, "limit": 10 }),
            staff(org),
        );
        assert_eq!(
            res["data"].as_array().expect("data").len(),
            expected_len,
            "page {}",
            page
        );
        assert_eq!(res["meta"]["total"], json!(25));
        assert_eq!(res["meta"]["totalPages"], json!(3));
        assert_eq!(res["meta"]["page"], json!(page));
        assert_eq!(res["meta"]["limit"], json!(10));
    }

    // Default page/limit.
    let res = request_ok(
        &mut stdin,
        &mut reader,
        "list-default",
        "attendance.list",
        json!({}),
        staff(org),
    );
    assert_eq!(res["data"].as_array().expect("data").len(), 10);
    assert_eq!(res["meta"]["page"], json!(1));
    assert_eq!(res["meta"]["limit"], json!(10));

    // Page rows are ordered newest-first and carry the fixed projection.
    let first = &res["data"][0];
    assert_eq!(first["date"], json!("2025-01-25"));
    assert_eq!(first["student"]["name"], json!("Rahim Uddin"));
    assert_eq!(first["student"]["roll"], json!("101"));
    assert_eq!(first["department"]["name"], json!("Science"));

    let _ = child.kill();
}

#[test]
fn empty_result_set_is_not_an_error() {
    let workspace = temp_dir("registrard-attendance-empty");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let org = "org-a";

    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
        json!(null),
    );
    let res = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "attendance.list",
        json!({ "status": "absent" }),
        staff(org),
    );
    assert_eq!(res["data"], json!([]));
    assert_eq!(res["meta"]["total"], json!(0));
    assert_eq!(res["meta"]["totalPages"], json!(0));

    let _ = child.kill();
}

#[test]
fn non_positive_pagination_is_rejected() {
    let workspace = temp_dir("registrard-attendance-badpage");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let org = "org-a";

    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
        json!(null),
    );
    let code = request_err(
        &mut stdin,
        &mut reader,
        "2",
        "attendance.list",
        json!({ "limit": 0 }),
        staff(org),
    );
    assert_eq!(code, "bad_params");
    let code = request_err(
        &mut stdin,
        &mut reader,
        "3",
        "attendance.list",
        json!({ "limit": -10 }),
        staff(org),
    );
    assert_eq!(code, "bad_params");
    let code = request_err(
        &mut stdin,
        &mut reader,
        "4",
        "attendance.list",
        json!({ "page": 0 }),
        staff(org),
    );
    assert_eq!(code, "bad_params");

    let _ = child.kill();
}
