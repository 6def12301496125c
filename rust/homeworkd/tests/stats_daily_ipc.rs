mod test_support;

use serde_json::{json, Value};
use test_support::{household, request_ok, spawn_sidecar, temp_dir, PINNED_TODAY};

fn messages(result: &Value) -> Vec<String> {
    result["diagnostics"]
        .as_array()
        .expect("diagnostics")
        .iter()
        .filter_map(|d| d["message"].as_str().map(str::to_string))
        .collect()
}

#[test]
fn daily_achievement_needs_everything_signed_off() {
    let workspace = temp_dir("homeworkd-stats-daily");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let (parent, student) = household(&mut stdin, &mut reader, &workspace);

    let subject = request_ok(&mut stdin, &mut reader, "1", "subjects.create", json!({ "name": "Math" }));
    let subject_id = subject["subjectId"].as_str().expect("subject id").to_string();
    let theme = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "themes.create",
        json!({ "subjectId": subject_id, "title": "Fractions" }),
    );
    let theme_id = theme["theme"]["id"].as_str().expect("theme id").to_string();
    for (i, (weekday, slot)) in [(0, 0), (1, 2)].into_iter().enumerate() {
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            &format!("cell-{}", i),
            "timetable.setCell",
            json!({ "weekday": weekday, "slot": slot, "subjectName": "Math" }),
        );
    }
    let hw = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "homework.create",
        json!({ "title": "Exercises 1-10", "ownerId": student, "subjectId": subject_id, "dueDate": PINNED_TODAY }),
    );
    let hw_id = hw["homework"]["id"].as_str().expect("homework id").to_string();
    let task = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "tasks.create",
        json!({ "title": "Sharpen pencils", "ownerId": student }),
    );
    let task_id = task["task"]["id"].as_str().expect("task id").to_string();

    let _ = request_ok(&mut stdin, &mut reader, "5", "session.open", json!({ "profileId": student }));
    let today = request_ok(&mut stdin, &mut reader, "6", "stats.today", json!({}));
    assert_eq!(today["date"], PINNED_TODAY);
    assert_eq!(today["homework"].as_array().expect("homework").len(), 1);
    assert_eq!(today["tasks"].as_array().expect("tasks").len(), 1);

    let before = request_ok(&mut stdin, &mut reader, "7", "stats.daily", json!({}));
    assert_eq!(before["dailyAchievement"], false);
    assert_eq!(before["homeworkCount"], 1);
    assert_eq!(before["tasksCount"], 1);
    assert_eq!(before["themeUpdated"], false);

    let _ = request_ok(&mut stdin, &mut reader, "8", "tasks.toggle", json!({ "taskId": task_id }));
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "homework.photos.add",
        json!({ "homeworkId": hw_id, "storagePath": "hw/1.jpg" }),
    );
    let _ = request_ok(&mut stdin, &mut reader, "10", "homework.submit", json!({ "homeworkId": hw_id }));
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "themes.updateRating",
        json!({ "themeId": theme_id, "rating": 4 }),
    );

    let waiting = request_ok(&mut stdin, &mut reader, "12", "stats.daily", json!({}));
    assert_eq!(waiting["allTasksCompleted"], true);
    assert_eq!(waiting["themeUpdated"], true);
    assert_eq!(waiting["allHomeworkApproved"], false, "submitted is not approved");
    assert_eq!(waiting["dailyAchievement"], false);

    let _ = request_ok(&mut stdin, &mut reader, "13", "session.open", json!({ "profileId": parent }));
    let _ = request_ok(&mut stdin, &mut reader, "14", "homework.approve", json!({ "homeworkId": hw_id }));
    let _ = request_ok(&mut stdin, &mut reader, "15", "session.open", json!({ "profileId": student }));

    let done = request_ok(&mut stdin, &mut reader, "16", "stats.daily", json!({ "date": PINNED_TODAY }));
    assert_eq!(done["dailyAchievement"], true);
    assert_eq!(done["skipped"], false);
    assert!(done.get("reason").is_none());

    let cleared = request_ok(&mut stdin, &mut reader, "17", "stats.today", json!({}));
    assert!(cleared["homework"].as_array().expect("homework").is_empty());
    assert!(cleared["tasks"].as_array().expect("tasks").is_empty());

    let saturday = request_ok(&mut stdin, &mut reader, "18", "stats.daily", json!({ "date": "2025-11-08" }));
    assert_eq!(saturday["skipped"], true);
    assert_eq!(saturday["reason"], "weekend");
    assert_eq!(saturday["dailyAchievement"], false);

    let weekly = request_ok(&mut stdin, &mut reader, "19", "stats.weekly", json!({}));
    assert_eq!(weekly["week"]["weekKey"], "2025-W45");
    assert_eq!(weekly["tasks"]["total"], 1);
    assert_eq!(weekly["tasks"]["done"], 1);
    assert_eq!(weekly["homework"]["completed"], 1);
    assert_eq!(weekly["homework"]["overdue"], 0);
    assert_eq!(weekly["completedTasksWeek"], 1);
    assert_eq!(weekly["approvedHomeworkWeek"], 1);
    assert_eq!(weekly["studyTime"]["totalMinutes"], 90);
    assert_eq!(weekly["studyTime"]["bySubject"]["Math"], 90);
    assert_eq!(weekly["ratings"]["bySubject"]["Math"], 4.0);
    assert_eq!(weekly["ratings"]["overallAverage"], 4.0);

    let previous = request_ok(&mut stdin, &mut reader, "20", "stats.weekly", json!({ "offset": -1 }));
    assert_eq!(previous["week"]["weekKey"], "2025-W44");
    assert_eq!(previous["completedTasksWeek"], 0);
    assert_eq!(previous["studyTime"]["totalMinutes"], 90, "standing schedule applies to every week");

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn diagnostics_report_empty_and_healthy_workspaces() {
    let workspace = temp_dir("homeworkd-diagnostics");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let empty = request_ok(&mut stdin, &mut reader, "2", "diagnostics.run", json!({}));
    let notes = messages(&empty);
    assert!(notes.iter().any(|m| m.starts_with("No open session")), "{:?}", notes);
    assert!(notes.iter().any(|m| m == "No data found yet."), "{:?}", notes);

    let profile = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "profiles.create",
        json!({ "displayName": "Parent", "role": "parent" }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "session.open",
        json!({ "profileId": profile["profileId"] }),
    );
    let _ = request_ok(&mut stdin, &mut reader, "5", "subjects.create", json!({ "name": "Physics" }));
    let _ = request_ok(&mut stdin, &mut reader, "6", "cache.snapshot", json!({}));

    let healthy = request_ok(&mut stdin, &mut reader, "7", "diagnostics.run", json!({}));
    assert_eq!(healthy["diagnostics"].as_array().expect("diagnostics").len(), 1);
    assert_eq!(healthy["diagnostics"][0]["level"], "success");

    std::fs::write(workspace.join("cache").join("snapshot.json"), "{ torn write").expect("corrupt snapshot");
    let broken = request_ok(&mut stdin, &mut reader, "8", "diagnostics.run", json!({}));
    assert_eq!(broken["diagnostics"][0]["level"], "error");
    assert_eq!(messages(&broken), vec!["The cache snapshot could not be read.".to_string()]);

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn recent_weeks_roll_up_daily_achievements() {
    let workspace = temp_dir("homeworkd-stats-weeks");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = household(&mut stdin, &mut reader, &workspace);

    let subject = request_ok(&mut stdin, &mut reader, "1", "subjects.create", json!({ "name": "Biology" }));
    let subject_id = subject["subjectId"].as_str().expect("subject id").to_string();
    let theme = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "themes.create",
        json!({ "subjectId": subject_id, "title": "Cells" }),
    );
    let theme_id = theme["theme"]["id"].as_str().expect("theme id").to_string();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "themes.updateRating",
        json!({ "themeId": theme_id, "rating": 4 }),
    );

    let history = request_ok(&mut stdin, &mut reader, "4", "stats.weeks", json!({ "limit": 3 }));
    let weeks = history["weeks"].as_array().expect("weeks");
    let keys: Vec<&str> = weeks.iter().filter_map(|w| w["week"]["weekKey"].as_str()).collect();
    assert_eq!(keys, vec!["2025-W45", "2025-W44", "2025-W43"]);
    assert_eq!(weeks[0]["schoolDays"], 3, "monday to the pinned wednesday");
    assert_eq!(weeks[0]["achievedDays"], 1);
    assert_eq!(weeks[0]["themeUpdatesCount"], 1);
    assert_eq!(weeks[1]["schoolDays"], 5);
    assert_eq!(weeks[1]["achievedDays"], 0);

    let default = request_ok(&mut stdin, &mut reader, "5", "stats.weeks", json!({}));
    assert_eq!(default["weeks"].as_array().expect("weeks").len(), 4);
    for (i, limit) in [json!(0), json!(53), json!("two")].into_iter().enumerate() {
        let resp = test_support::request(
            &mut stdin,
            &mut reader,
            &format!("bad-{}", i),
            "stats.weeks",
            json!({ "limit": limit }),
        );
        assert_eq!(resp["error"]["code"], "bad_params", "limit {}", limit);
    }

    let _ = std::fs::remove_dir_all(workspace);
}
