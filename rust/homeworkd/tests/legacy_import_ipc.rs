mod test_support;

use serde_json::{json, Value};
use test_support::{household, request, request_ok, spawn_sidecar, temp_dir};

fn find<'a>(items: &'a Value, key: &str, value: &str) -> &'a Value {
    items
        .as_array()
        .expect("array")
        .iter()
        .find(|r| r[key] == value)
        .unwrap_or_else(|| panic!("no record with {} = {}", key, value))
}

const LEGACY: &str = r##"{
  "schoolSystemData": {
    "subjects": [
      { "name": "Math", "color": "#123456", "themes": [ { "name": "Fractions", "progress": 80 } ] },
      { "name": "Art", "color": "red" }
    ],
    "homework": [
      { "id": "h1", "subject": "Math", "title": "p. 42", "dueDate": "2025-11-04", "completed": true, "photos": ["a.jpg", "a.jpg"] },
      { "id": "h2", "subject": "History", "text": "Essay", "status": "submitted" }
    ],
    "todayTasks": [
      { "id": 7, "text": "Pack bag", "completed": true, "priority": "high" },
      { "id": 8, "text": "Read", "adminTask": true }
    ],
    "timetable": {
      "Monday_0": { "subject": "Math", "room": "101" },
      "Saturday_0": { "subject": "Art" },
      "Tuesday_11": { "subject": "Art" }
    }
  }
}"##;

#[test]
fn parent_import_brings_everything_in() {
    let workspace = temp_dir("homeworkd-legacy");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let (parent, _student) = household(&mut stdin, &mut reader, &workspace);
    let file = workspace.join("legacy-cache.json");
    std::fs::write(&file, LEGACY).expect("write legacy cache");

    let imported = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "import.legacyCache",
        json!({ "path": file.to_string_lossy() }),
    );
    let counts = &imported["counts"];
    assert_eq!(counts["subjectsCreated"], 3);
    assert_eq!(counts["themes"], 1);
    assert_eq!(counts["homework"], 2);
    assert_eq!(counts["photos"], 1);
    assert_eq!(counts["tasks"], 2);
    assert_eq!(counts["timetableCells"], 1);
    assert_eq!(counts["skipped"], 2, "weekend and out-of-range cells");

    let subjects = request_ok(&mut stdin, &mut reader, "2", "subjects.list", json!({}));
    let math = find(&subjects["subjects"], "name", "Math");
    assert_eq!(math["color"], "#123456");
    assert_eq!(math["themes"][0]["rating"], 4);
    assert_eq!(find(&subjects["subjects"], "name", "Art")["color"], "#667eea");

    let homework = request_ok(&mut stdin, &mut reader, "3", "homework.list", json!({}));
    let page = find(&homework["homework"], "localId", "h1");
    assert_eq!(page["status"], "approved");
    assert_eq!(page["ownerId"], parent.as_str());
    assert_eq!(page["photos"], json!(["a.jpg"]));
    let essay = find(&homework["homework"], "localId", "h2");
    assert_eq!(essay["status"], "pending", "submissions without photos are reset");
    assert_eq!(essay["subjectName"], "History");

    let tasks = request_ok(&mut stdin, &mut reader, "4", "tasks.list", json!({}));
    let bag = find(&tasks["tasks"], "localId", "7");
    assert_eq!(bag["status"], "completed");
    assert_eq!(bag["priority"], "H");
    let read = find(&tasks["tasks"], "localId", "8");
    assert_eq!(read["required"], true);
    assert_eq!(read["assignedBy"], parent.as_str());

    let grid = request_ok(&mut stdin, &mut reader, "5", "timetable.get", json!({}));
    let cells = grid["cells"].as_array().expect("cells");
    assert_eq!(cells.len(), 1);
    assert_eq!(cells[0]["room"], "101");
    assert_eq!(cells[0]["source"], "standing");

    let again = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "import.legacyCache",
        json!({ "path": file.to_string_lossy() }),
    );
    assert_eq!(again["counts"]["subjectsCreated"], 0);
    assert_eq!(again["counts"]["photos"], 0);
    let tasks = request_ok(&mut stdin, &mut reader, "7", "tasks.list", json!({}));
    assert_eq!(tasks["tasks"].as_array().expect("tasks").len(), 2, "reimport updates in place");
    let subjects = request_ok(&mut stdin, &mut reader, "8", "subjects.list", json!({}));
    assert_eq!(find(&subjects["subjects"], "name", "Math")["themes"].as_array().expect("themes").len(), 1);

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn student_import_is_held_to_student_rules() {
    let workspace = temp_dir("homeworkd-legacy-student");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let (_parent, student) = household(&mut stdin, &mut reader, &workspace);
    let file = workspace.join("kid-cache.json");
    std::fs::write(
        &file,
        r#"{ "allTasks": [ { "id": "s1", "text": "Practice piano", "status": "approved", "adminTask": true } ],
             "timetable": { "Monday_1": { "subject": "Music" } } }"#,
    )
    .expect("write legacy cache");

    let _ = request_ok(&mut stdin, &mut reader, "1", "session.open", json!({ "profileId": student }));
    let imported = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "import.legacyCache",
        json!({ "path": file.to_string_lossy() }),
    );
    assert_eq!(imported["counts"]["tasks"], 1);
    assert_eq!(imported["counts"]["timetableCells"], 0);
    assert_eq!(imported["counts"]["skipped"], 1);

    let tasks = request_ok(&mut stdin, &mut reader, "3", "tasks.list", json!({}));
    let piano = find(&tasks["tasks"], "localId", "s1");
    assert_eq!(piano["status"], "completed");
    assert_eq!(piano["required"], false);
    assert_eq!(piano["ownerId"], student.as_str());

    let missing = workspace.join("nope.json");
    let resp = request(
        &mut stdin,
        &mut reader,
        "4",
        "import.legacyCache",
        json!({ "path": missing.to_string_lossy() }),
    );
    assert_eq!(resp["ok"], false);
    assert_eq!(resp["error"]["code"], "io_failed");
    assert_eq!(resp["error"]["details"]["path"], &*missing.to_string_lossy());

    let garbage = workspace.join("garbage.json");
    std::fs::write(&garbage, "{ not json").expect("write garbage");
    let resp = request(
        &mut stdin,
        &mut reader,
        "5",
        "import.legacyCache",
        json!({ "path": garbage.to_string_lossy() }),
    );
    assert_eq!(resp["error"]["code"], "io_failed");

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn reimport_leaves_approved_homework_alone() {
    let workspace = temp_dir("homeworkd-legacy-locked");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let (parent, student) = household(&mut stdin, &mut reader, &workspace);
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "setup.update",
        json!({ "section": "homework", "patch": { "maxPhotos": 2 } }),
    );

    let first = workspace.join("first.json");
    std::fs::write(
        &first,
        r#"{ "homework": [ { "id": "e1", "title": "Essay", "status": "submitted",
                             "photos": ["a.jpg", "b.jpg", "c.jpg"] } ] }"#,
    )
    .expect("write first cache");
    let _ = request_ok(&mut stdin, &mut reader, "2", "session.open", json!({ "profileId": student }));
    let imported = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "import.legacyCache",
        json!({ "path": first.to_string_lossy() }),
    );
    assert_eq!(imported["counts"]["homework"], 1);
    assert_eq!(imported["counts"]["photos"], 2, "photos stop at maxPhotos");

    let listed = request_ok(&mut stdin, &mut reader, "4", "homework.list", json!({}));
    let essay = find(&listed["homework"], "localId", "e1");
    assert_eq!(essay["status"], "submitted");
    assert_eq!(essay["photos"], json!(["a.jpg", "b.jpg"]));
    let essay_id = essay["id"].as_str().expect("homework id").to_string();

    let _ = request_ok(&mut stdin, &mut reader, "5", "session.open", json!({ "profileId": parent }));
    let _ = request_ok(&mut stdin, &mut reader, "6", "homework.approve", json!({ "homeworkId": essay_id }));

    let second = workspace.join("second.json");
    std::fs::write(
        &second,
        r#"{ "homework": [ { "id": "e1", "title": "tampered", "notes": "new notes",
                             "photos": ["z.jpg"] } ] }"#,
    )
    .expect("write second cache");
    let _ = request_ok(&mut stdin, &mut reader, "7", "session.open", json!({ "profileId": student }));
    let again = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "import.legacyCache",
        json!({ "path": second.to_string_lossy() }),
    );
    assert_eq!(again["counts"]["homework"], 0);
    assert_eq!(again["counts"]["photos"], 0);
    assert_eq!(again["counts"]["skipped"], 1);

    let listed = request_ok(&mut stdin, &mut reader, "9", "homework.list", json!({}));
    let essay = find(&listed["homework"], "localId", "e1");
    assert_eq!(essay["status"], "approved");
    assert_eq!(essay["title"], "Essay");
    assert_eq!(essay["notes"], "");
    assert_eq!(essay["photos"], json!(["a.jpg", "b.jpg"]));

    let pushed = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "sync.merge",
        json!({ "kind": "homework", "push": true,
                "local": [ { "localId": "e2", "title": "Poem", "status": "submitted",
                             "photos": ["1.jpg", "2.jpg", "3.jpg"] } ] }),
    );
    assert_eq!(pushed["pushed"], 1);
    let listed = request_ok(&mut stdin, &mut reader, "11", "homework.list", json!({}));
    let poem = find(&listed["homework"], "localId", "e2");
    assert_eq!(poem["photos"].as_array().expect("photos").len(), 2);

    let _ = std::fs::remove_dir_all(workspace);
}
