use serde_json::json;
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
    let exe = env!("CARGO_BIN_EXE_attendanced");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn attendanced");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    if value.get("ok").and_then(|v| v.as_bool()) == Some(false) {
        let code = value
            .get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown");
        assert_ne!(
            code, "not_implemented",
            "unexpected unknown method for {}",
            method
        );
    }
    value
}

#[test]
fn router_dispatch_smoke_covers_handler_families() {
    let workspace = temp_dir("attendanced-router-smoke");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request(&mut stdin, &mut reader, "1", "health", json!({}));
    let _ = request(
        &mut stdin,
        &mut reader,
        "2",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let created = request(
        &mut stdin,
        &mut reader,
        "3",
        "courses.create",
        json!({ "name": "Smoke Course" }),
    );
    let course_id = created
        .get("result")
        .and_then(|v| v.get("courseId"))
        .and_then(|v| v.as_str())
        .expect("courseId")
        .to_string();

    let created = request(
        &mut stdin,
        &mut reader,
        "4",
        "users.create",
        json!({
            "idNumber": "9009001",
            "firstName": "Smoke",
            "lastName": "Student"
        }),
    );
    let user_id = created
        .get("result")
        .and_then(|v| v.get("userId"))
        .and_then(|v| v.as_str())
        .expect("userId")
        .to_string();
    let _ = request(
        &mut stdin,
        &mut reader,
        "5",
        "enrolments.add",
        json!({ "courseId": course_id, "userId": user_id }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "6",
        "directory.setIdNumberFields",
        json!({ "fields": ["studentcard"] }),
    );

    let created = request(
        &mut stdin,
        &mut reader,
        "7",
        "instances.create",
        json!({ "courseId": course_id, "name": "Smoke attendance", "maxGrade": 100.0 }),
    );
    let instance_id = created
        .get("result")
        .and_then(|v| v.get("instanceId"))
        .and_then(|v| v.as_str())
        .expect("instanceId")
        .to_string();
    let _ = request(
        &mut stdin,
        &mut reader,
        "7a",
        "instances.update",
        json!({ "instanceId": instance_id, "patch": { "maxGrade": 80.0 } }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "7b",
        "instances.list",
        json!({ "courseId": course_id }),
    );

    let created = request(
        &mut stdin,
        &mut reader,
        "8",
        "statuses.add",
        json!({
            "instanceId": instance_id,
            "acronym": "P",
            "description": "Present",
            "points": 2.0
        }),
    );
    let status_id = created
        .get("result")
        .and_then(|v| v.get("statusId"))
        .and_then(|v| v.as_str())
        .expect("statusId")
        .to_string();
    let _ = request(
        &mut stdin,
        &mut reader,
        "8a",
        "statuses.update",
        json!({
            "instanceId": instance_id,
            "statusId": status_id,
            "patch": { "description": "In class" }
        }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "8b",
        "statuses.list",
        json!({ "instanceId": instance_id }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "8c",
        "statuses.resolve",
        json!({ "instanceId": instance_id, "token": "P" }),
    );

    let created = request(
        &mut stdin,
        &mut reader,
        "9",
        "sessions.add",
        json!({
            "instanceId": instance_id,
            "sessions": [{ "startTime": 1_600_000_000i64, "duration": 1800 }]
        }),
    );
    let session_id = created
        .get("result")
        .and_then(|v| v.get("sessionIds"))
        .and_then(|v| v.get(0))
        .and_then(|v| v.as_str())
        .expect("sessionId")
        .to_string();
    let _ = request(
        &mut stdin,
        &mut reader,
        "9a",
        "sessions.update",
        json!({
            "instanceId": instance_id,
            "sessionId": session_id,
            "patch": { "description": "smoke session" }
        }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "9b",
        "sessions.list",
        json!({ "instanceId": instance_id }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "9c",
        "sessions.mostRecentStart",
        json!({ "instanceId": instance_id }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "9d",
        "sessions.findCovering",
        json!({ "instanceId": instance_id, "time": 1_600_000_900i64 }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "9e",
        "sessions.log",
        json!({ "sessionId": session_id }),
    );

    let _ = request(
        &mut stdin,
        &mut reader,
        "10",
        "import.run",
        json!({
            "instanceId": instance_id,
            "text": "9009001",
            "defaultTime": 1_600_000_900i64,
            "defaultStatus": "P",
            "takenBy": "smoke-teacher"
        }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "10a",
        "import.buffer",
        json!({ "instanceId": instance_id }),
    );

    let _ = request(
        &mut stdin,
        &mut reader,
        "11",
        "take.session",
        json!({
            "instanceId": instance_id,
            "sessionId": session_id,
            "takenBy": "smoke-teacher",
            "marks": [{ "userId": user_id, "statusId": status_id }]
        }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "12",
        "grades.update",
        json!({ "instanceId": instance_id }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "12a",
        "grades.userStat",
        json!({ "instanceId": instance_id, "userId": user_id }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "13",
        "live.checkoff",
        json!({
            "instanceId": instance_id,
            "mode": "idnumber",
            "user": "9009001",
            "session": session_id,
            "takenBy": "smoke-teacher"
        }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "14",
        "statuses.delete",
        json!({ "instanceId": instance_id, "statusId": status_id }),
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn unknown_methods_and_missing_workspace_use_the_error_envelope() {
    let workspace = temp_dir("attendanced-router-errors");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    // No workspace selected yet: store-backed methods refuse to run.
    let payload = json!({ "id": "pre", "method": "statuses.list", "params": { "instanceId": "x" } });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");
    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value["ok"].as_bool(), Some(false));
    assert_eq!(value["error"]["code"], "no_workspace");

    let _ = request(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let payload = json!({ "id": "gone", "method": "no.such.method", "params": {} });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");
    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value["id"].as_str(), Some("gone"));
    assert_eq!(value["ok"].as_bool(), Some(false));
    assert_eq!(value["error"]["code"], "not_implemented");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
