mod test_support;

use serde_json::{json, Value};
use test_support::{household, request_err, request_ok, spawn_sidecar, temp_dir};

fn cell<'a>(grid: &'a Value, weekday: u64, slot: u64) -> Option<&'a Value> {
    grid["cells"].as_array().expect("cells").iter().find(|c| {
        c["weekday"].as_u64() == Some(weekday) && c["slot"].as_u64() == Some(slot)
    })
}

#[test]
fn standing_schedule_with_week_overrides() {
    let workspace = temp_dir("homeworkd-timetable");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let (_parent, student) = household(&mut stdin, &mut reader, &workspace);

    let info = request_ok(&mut stdin, &mut reader, "1", "week.info", json!({}));
    assert_eq!(info["weekKey"], "2025-W45");
    assert_eq!(info["start"], "2025-11-03");
    let next = request_ok(&mut stdin, &mut reader, "2", "week.info", json!({ "offset": 1 }));
    assert_eq!(next["weekKey"], "2025-W46");

    let set = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "timetable.setCell",
        json!({ "weekday": 0, "slot": 0, "subjectName": "Math", "room": "B12", "isDouble": true }),
    );
    assert_eq!(set["subjectCreated"], true);
    assert_eq!(set["mirrored"], true);

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "timetable.setCell",
        json!({ "weekKey": "2025-w45", "weekday": 0, "slot": 0, "subjectName": "Art" }),
    );

    let this_week = request_ok(&mut stdin, &mut reader, "5", "timetable.get", json!({}));
    assert_eq!(this_week["days"], 5);
    assert_eq!(this_week["slotsPerDay"], 9);
    let first = cell(&this_week, 0, 0).expect("override cell");
    assert_eq!(first["subjectName"], "Art");
    assert_eq!(first["source"], "week");
    let second = cell(&this_week, 0, 1).expect("standing second half");
    assert_eq!(second["subjectName"], "Math");
    assert_eq!(second["source"], "standing");
    assert_eq!(second["room"], "B12");

    let following = request_ok(&mut stdin, &mut reader, "6", "timetable.get", json!({ "weekKey": "2025-W46" }));
    assert_eq!(cell(&following, 0, 0).expect("standing cell")["subjectName"], "Math");

    let code = request_err(
        &mut stdin,
        &mut reader,
        "7",
        "timetable.setCell",
        json!({ "weekday": 5, "slot": 0, "subjectName": "Math" }),
    );
    assert_eq!(code, "bad_params");
    let code = request_err(
        &mut stdin,
        &mut reader,
        "8",
        "timetable.setCell",
        json!({ "weekday": 0, "slot": 9, "subjectName": "Math" }),
    );
    assert_eq!(code, "bad_params");
    let code = request_err(
        &mut stdin,
        &mut reader,
        "9",
        "timetable.setCell",
        json!({ "weekKey": "week 45", "weekday": 0, "slot": 0, "subjectName": "Math" }),
    );
    assert_eq!(code, "bad_params");

    let cleared = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "timetable.clearCell",
        json!({ "weekday": 0, "slot": 0 }),
    );
    assert_eq!(cleared["removed"], 2, "double lessons clear both halves");

    let wiped = request_ok(&mut stdin, &mut reader, "11", "timetable.clearWeek", json!({ "weekKey": "2025-W45" }));
    assert_eq!(wiped["removed"], 1);
    let empty = request_ok(&mut stdin, &mut reader, "12", "timetable.get", json!({}));
    assert!(empty["cells"].as_array().expect("cells").is_empty());

    let _ = request_ok(&mut stdin, &mut reader, "13", "session.open", json!({ "profileId": student }));
    let code = request_err(
        &mut stdin,
        &mut reader,
        "14",
        "timetable.setCell",
        json!({ "weekday": 1, "slot": 2, "subjectName": "Gaming" }),
    );
    assert_eq!(code, "forbidden");
    let _ = request_ok(&mut stdin, &mut reader, "15", "timetable.get", json!({ "date": "2025-11-05" }));

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn last_slot_double_is_not_mirrored() {
    let workspace = temp_dir("homeworkd-timetable-edge");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = household(&mut stdin, &mut reader, &workspace);

    let set = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "timetable.setCell",
        json!({ "weekday": 4, "slot": 8, "subjectName": "Sport", "isDouble": true }),
    );
    assert_eq!(set["mirrored"], false);

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "timetable.setCell",
        json!({ "weekday": 2, "slot": 3, "subjectName": "Music", "isDouble": true }),
    );
    let single = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "timetable.setCell",
        json!({ "weekday": 2, "slot": 3, "subjectName": "Music" }),
    );
    assert_eq!(single["mirrored"], false);
    let grid = request_ok(&mut stdin, &mut reader, "4", "timetable.get", json!({}));
    assert!(cell(&grid, 2, 4).is_none(), "former second half is removed");
    assert_eq!(cell(&grid, 2, 3).expect("single")["isDouble"], false);

    let _ = std::fs::remove_dir_all(workspace);
}
