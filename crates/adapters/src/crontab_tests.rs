// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use taskd_core::{Priority, ScheduleId, TaskClass};
use yare::parameterized;

fn schedule(id: &str, name: &str, enabled: bool) -> ScheduleRecord {
    ScheduleRecord {
        id: ScheduleId::new(id),
        name: name.to_string(),
        cron_expr: "0 3 * * *".to_string(),
        description: "nightly sweep".to_string(),
        class: TaskClass::Medium,
        priority: Priority::Low,
        working_dir: None,
        enabled,
        created_at_ms: 1_000,
        last_fired_at_ms: None,
    }
}

#[parameterized(
    daily = { "0 3 * * *" },
    every_five_minutes = { "*/5 * * * *" },
    weekdays = { "30 9 * * 1-5" },
)]
fn accepts_standard_expressions(expr: &str) {
    assert!(validate_expr(expr).is_ok());
}

#[parameterized(
    too_few_fields = { "0 3 * *" },
    too_many_fields = { "0 0 3 * * *" },
    nonsense = { "potato 3 * * *" },
    out_of_range = { "0 99 * * *" },
)]
fn rejects_bad_expressions(expr: &str) {
    assert!(validate_expr(expr).is_err(), "{expr} should be rejected");
}

#[test]
fn render_block_pairs_sentinel_with_entry() {
    let block = render_block(&[schedule("s-1", "nightly", true)], "/usr/bin/taskctl");
    let lines: Vec<&str> = block.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].starts_with("# AUTO_CLAUDE_TASK:s-1 - nightly (created: 1000)"));
    assert!(lines[1].starts_with("0 3 * * * /usr/bin/taskctl submit --name 'nightly'"));
    assert!(lines[1].contains("--class medium_context"));
    assert!(lines[1].contains("--priority low"));
}

#[test]
fn disabled_schedules_are_omitted() {
    let block = render_block(&[schedule("s-1", "off", false)], "taskctl");
    assert!(block.is_empty());
}

#[test]
fn quoting_survives_awkward_names() {
    let mut s = schedule("s-1", "it's nightly", true);
    s.description = "run; rm nothing".to_string();
    let block = render_block(&[s], "taskctl");
    assert!(block.contains(r"--name 'it'\''s nightly'"));
    assert!(block.contains("--description 'run; rm nothing'"));
}

#[test]
fn strip_managed_removes_sentinel_pairs_only() {
    let crontab = "\
MAILTO=ops@example.com
# AUTO_CLAUDE_TASK:s-1 - nightly (created: 1000)
0 3 * * * taskctl submit --name 'nightly'
15 4 * * * /usr/bin/backup.sh
";
    let stripped = strip_managed(crontab);
    assert_eq!(
        stripped,
        "MAILTO=ops@example.com\n15 4 * * * /usr/bin/backup.sh\n"
    );
}

#[tokio::test]
async fn sync_rewrites_managed_block_preserving_foreign_lines() {
    let fake = FakeCrontab::with_content("15 4 * * * /usr/bin/backup.sh\n");
    let manager = CrontabManager::new(fake.clone(), "taskctl");

    manager
        .sync(&[schedule("s-1", "nightly", true), schedule("s-2", "weekly", true)])
        .await
        .unwrap();

    let content = fake.content();
    assert!(content.starts_with("15 4 * * * /usr/bin/backup.sh\n"));
    assert!(content.contains("AUTO_CLAUDE_TASK:s-1"));
    assert!(content.contains("AUTO_CLAUDE_TASK:s-2"));

    // A second sync with one schedule drops the other entry.
    manager.sync(&[schedule("s-1", "nightly", true)]).await.unwrap();
    let content = fake.content();
    assert!(content.contains("AUTO_CLAUDE_TASK:s-1"));
    assert!(!content.contains("AUTO_CLAUDE_TASK:s-2"));
    assert!(content.contains("backup.sh"));
}

#[tokio::test]
async fn sync_with_no_schedules_clears_the_block() {
    let fake = FakeCrontab::with_content(
        "# AUTO_CLAUDE_TASK:s-1 - nightly (created: 1000)\n0 3 * * * taskctl submit\n",
    );
    let manager = CrontabManager::new(fake.clone(), "taskctl");
    manager.sync(&[]).await.unwrap();
    assert_eq!(fake.content(), "");
}
