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

fn request_ok(
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
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn setup_instance(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    workspace: &std::path::Path,
) -> String {
    let _ = request_ok(
        stdin,
        reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let course_id = request_ok(
        stdin,
        reader,
        "course",
        "courses.create",
        json!({ "name": "Chemistry", "startDate": 0 }),
    )["courseId"]
        .as_str()
        .expect("courseId")
        .to_string();
    request_ok(
        stdin,
        reader,
        "inst",
        "instances.create",
        json!({ "courseId": course_id, "name": "Lab attendance", "maxGrade": 50.0 }),
    )["instanceId"]
        .as_str()
        .expect("instanceId")
        .to_string()
}

const T0: i64 = 1_600_000_000; // 09:00 for the purposes of this file

#[test]
fn covering_lookup_prefers_the_session_ending_soonest() {
    let workspace = temp_dir("attendanced-covering");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let instance_id = setup_instance(&mut stdin, &mut reader, &workspace);

    // Long session starts first; a shorter one overlaps and ends earlier.
    let ids = request_ok(
        &mut stdin,
        &mut reader,
        "sess",
        "sessions.add",
        json!({
            "instanceId": instance_id,
            "sessions": [
                { "startTime": T0, "duration": 3600, "description": "long" },
                { "startTime": T0 + 600, "duration": 1800, "description": "short" }
            ]
        }),
    );
    let long_id = ids["sessionIds"][0].as_str().expect("long").to_string();
    let short_id = ids["sessionIds"][1].as_str().expect("short").to_string();

    // Both cover T0+900; the short one ends at T0+2400 < T0+3600.
    let covering = request_ok(
        &mut stdin,
        &mut reader,
        "cov1",
        "sessions.findCovering",
        json!({ "instanceId": instance_id, "time": T0 + 900 }),
    );
    assert_eq!(covering["sessionId"].as_str(), Some(short_id.as_str()));

    // Only the long session covers an instant before the short one starts.
    let covering = request_ok(
        &mut stdin,
        &mut reader,
        "cov2",
        "sessions.findCovering",
        json!({ "instanceId": instance_id, "time": T0 + 300 }),
    );
    assert_eq!(covering["sessionId"].as_str(), Some(long_id.as_str()));

    // Window bounds are inclusive on both ends.
    let covering = request_ok(
        &mut stdin,
        &mut reader,
        "cov3",
        "sessions.findCovering",
        json!({ "instanceId": instance_id, "time": T0 + 2400 }),
    );
    assert_eq!(covering["sessionId"].as_str(), Some(short_id.as_str()));

    // Nothing covers an instant after every window closed.
    let covering = request_ok(
        &mut stdin,
        &mut reader,
        "cov4",
        "sessions.findCovering",
        json!({ "instanceId": instance_id, "time": T0 + 7200 }),
    );
    assert!(covering["sessionId"].is_null());

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn most_recent_start_ignores_future_sessions() {
    let workspace = temp_dir("attendanced-recent-start");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let instance_id = setup_instance(&mut stdin, &mut reader, &workspace);

    let far_future = 4_000_000_000i64;
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "sess",
        "sessions.add",
        json!({
            "instanceId": instance_id,
            "sessions": [
                { "startTime": T0, "duration": 3600 },
                { "startTime": T0 + 86_400, "duration": 3600 },
                { "startTime": far_future, "duration": 3600 }
            ]
        }),
    );

    let recent = request_ok(
        &mut stdin,
        &mut reader,
        "recent",
        "sessions.mostRecentStart",
        json!({ "instanceId": instance_id }),
    );
    assert_eq!(recent["startTime"].as_i64(), Some(T0 + 86_400));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn window_listing_is_ordered_and_group_filtered() {
    let workspace = temp_dir("attendanced-window-list");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let instance_id = setup_instance(&mut stdin, &mut reader, &workspace);

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "sess",
        "sessions.add",
        json!({
            "instanceId": instance_id,
            "sessions": [
                { "startTime": T0 + 7200, "duration": 1800, "groupId": 1 },
                { "startTime": T0, "duration": 1800 },
                { "startTime": T0 + 3600, "duration": 1800, "groupId": 2 }
            ]
        }),
    );

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "list1",
        "sessions.list",
        json!({ "instanceId": instance_id, "startTime": T0, "endTime": T0 + 86_400 }),
    );
    let sessions = listed["sessions"].as_array().expect("sessions");
    assert_eq!(sessions.len(), 3);
    let starts: Vec<i64> = sessions
        .iter()
        .map(|s| s["startTime"].as_i64().expect("startTime"))
        .collect();
    assert_eq!(starts, vec![T0, T0 + 3600, T0 + 7200]);

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "list2",
        "sessions.list",
        json!({ "instanceId": instance_id, "groupId": 2 }),
    );
    let sessions = listed["sessions"].as_array().expect("sessions");
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0]["startTime"].as_i64(), Some(T0 + 3600));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
