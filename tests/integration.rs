use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tempfile::TempDir;

/// 2023-03-08 in the store's nanosecond clock.
const BASE_NS: i64 = 700_000_000 * 1_000_000_000;
const MINUTE_NS: i64 = 60 * 1_000_000_000;

fn persona_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_persona"))
}

/// A rich-text body wrapping `text` the way the message store serializes it.
fn attributed_body(text: &str) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(b"\x04\x0bstreamtyped\x81\xe8\x03\x84\x01@\x84\x84\x84");
    body.extend_from_slice(b"\x12NSAttributedString\x00\x84\x84\x08NSObject\x00\x85\x92");
    body.extend_from_slice(b"\x84\x84\x84\x08NSString\x01\x94\x84\x01+");
    body.push(text.len() as u8);
    body.extend_from_slice(text.as_bytes());
    body.extend_from_slice(b"\x86\x84\x02iI\x01");
    body
}

struct Row {
    id: i64,
    text: Option<&'static str>,
    body: Option<Vec<u8>>,
    handle: i64,
    from_me: bool,
    minute: i64,
}

fn create_source_store(path: &Path) {
    let rows = vec![
        Row { id: 1, text: Some("want to grab tacos tonight?"), body: None, handle: 1, from_me: true, minute: 0 },
        Row { id: 2, text: Some("yes tacos please"), body: None, handle: 1, from_me: false, minute: 1 },
        Row { id: 3, text: None, body: Some(attributed_body("see you at 7")), handle: 1, from_me: true, minute: 2 },
        Row { id: 4, text: None, body: None, handle: 1, from_me: false, minute: 3 },
        Row { id: 5, text: Some("did you feed the horse"), body: None, handle: 1, from_me: false, minute: 180 },
        Row { id: 6, text: Some("gave him carrots and apples"), body: None, handle: 1, from_me: true, minute: 181 },
        Row { id: 7, text: Some("someone else entirely"), body: None, handle: 2, from_me: false, minute: 5 },
    ];

    let rt = tokio::runtime::Runtime::new().unwrap();
    rt.block_on(async {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .unwrap();

        sqlx::query(
            "CREATE TABLE message (ROWID INTEGER PRIMARY KEY, text TEXT, attributedBody BLOB, \
             handle_id INTEGER, is_from_me INTEGER, date INTEGER)",
        )
        .execute(&pool)
        .await
        .unwrap();

        for row in rows {
            sqlx::query(
                "INSERT INTO message (ROWID, text, attributedBody, handle_id, is_from_me, date) \
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(row.id)
            .bind(row.text)
            .bind(row.body)
            .bind(row.handle)
            .bind(row.from_me as i64)
            .bind(BASE_NS + row.minute * MINUTE_NS)
            .execute(&pool)
            .await
            .unwrap();
        }

        pool.close().await;
    });
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();
    let data_dir = root.join("data");
    fs::create_dir_all(&data_dir).unwrap();

    create_source_store(&root.join("chat.db"));

    fs::write(
        data_dir.join("tasks.json"),
        r#"[
  {"id": 1, "task": "fix the fence", "completed": false},
  {"id": 2, "task": "buy hay", "completed": true}
]"#,
    )
    .unwrap();

    let config_content = format!(
        r#"[db]
path = '{root}/data/persona.sqlite'

[source]
path = '{root}/chat.db'
handle_id = 1
messages_path = '{root}/data/messages.json'

[persona]
self_label = "Kate"
other_label = "Harry"

[tasks]
path = '{root}/data/tasks.json'

[transcripts]
dir = '{root}/data/chat_logs'

[special_prompts.be_my_boss]
retrieval_query = "horse carrots"
mode = "assign_task"
template = "<special_instructions>Tell Harry to {{task}}.</special_instructions>"
all_done = "<special_instructions>Nothing left to do!</special_instructions>"
"#,
        root = root.display()
    );

    let config_path = config_dir.join("persona.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_persona(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = persona_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path)
        .args(args)
        .env_remove("ANTHROPIC_API_KEY")
        .env_remove("RUST_LOG")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run persona binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

fn indexed_env() -> (TempDir, PathBuf) {
    let (tmp, config_path) = setup_test_env();
    for args in [&["init"][..], &["extract"], &["index"]] {
        let (stdout, stderr, success) = run_persona(&config_path, args);
        assert!(success, "{:?} failed: stdout={}, stderr={}", args, stdout, stderr);
    }
    (tmp, config_path)
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, _, success1) = run_persona(&config_path, &["init"]);
    assert!(success1, "First init failed");
    assert!(stdout.contains("initialized"));

    let (_, _, success2) = run_persona(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_extract_reports_counts() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_persona(&config_path, &["extract"]);
    assert!(success, "extract failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("Extracted 5 messages"), "stdout={}", stdout);
    assert!(stdout.contains("(1 messages had no extractable text)"));

    let messages = fs::read_to_string(tmp.path().join("data/messages.json")).unwrap();
    assert!(messages.contains("see you at 7"));
    assert!(!messages.contains("someone else entirely"));
}

#[test]
fn test_index_dry_run_writes_nothing() {
    let (_tmp, config_path) = setup_test_env();
    run_persona(&config_path, &["init"]);
    run_persona(&config_path, &["extract"]);

    let (stdout, _, success) = run_persona(&config_path, &["index", "--dry-run"]);
    assert!(success);
    assert!(stdout.contains("conversations: 2"), "stdout={}", stdout);

    let (stats, _, _) = run_persona(&config_path, &["stats"]);
    assert!(stats.contains("Conversations: 0"), "stats={}", stats);
}

#[test]
fn test_index_and_search() {
    let (_tmp, config_path) = indexed_env();

    let (stdout, _, success) = run_persona(&config_path, &["search", "tacos"]);
    assert!(success);
    assert!(stdout.contains("conv_0"), "stdout={}", stdout);
    assert!(!stdout.contains("conv_1"));

    let (stats, _, _) = run_persona(&config_path, &["stats"]);
    assert!(stats.contains("Conversations: 2"), "stats={}", stats);
    assert!(stats.contains("Messages:      5"), "stats={}", stats);
    assert!(stats.contains("1 of 2 remaining"));
}

#[test]
fn test_reindex_does_not_duplicate() {
    let (_tmp, config_path) = indexed_env();

    let (stdout, _, success) = run_persona(&config_path, &["index"]);
    assert!(success);
    assert!(stdout.contains("conversations indexed: 2"));

    let (stats, _, _) = run_persona(&config_path, &["stats"]);
    assert!(stats.contains("Conversations: 2"), "stats={}", stats);
}

#[test]
fn test_prompt_isolates_persona_voice() {
    let (_tmp, config_path) = indexed_env();

    let (stdout, stderr, success) = run_persona(&config_path, &["prompt", "tacos"]);
    assert!(success, "prompt failed: {}", stderr);

    let style_start = stdout.find("<style_reference>").unwrap();
    let style_end = stdout.find("</style_reference>").unwrap();
    let style = &stdout[style_start..style_end];
    assert!(style.contains("Kate: want to grab tacos tonight?"));
    assert!(style.contains("Kate: see you at 7"));
    assert!(!style.contains("Harry:"));

    assert!(stdout.contains("Harry: yes tacos please"));
    assert!(stdout.contains("Harry just texted you: tacos"));
    assert!(stdout.trim_end().ends_with("Respond as Kate:"));
    assert!(!stdout.contains("special_instructions"));
}

#[test]
fn test_special_prompt_assigns_open_task() {
    let (_tmp, config_path) = indexed_env();

    let (stdout, stderr, success) = run_persona(&config_path, &["prompt", "be_my_boss"]);
    assert!(success, "prompt failed: {}", stderr);
    assert!(stdout.contains("Tell Harry to fix the fence."));
    assert!(stdout.contains("active task: 1"));
    assert!(stdout.contains("Kate: gave him carrots and apples"));

    // Assembly never completes the task.
    let (tasks, _, _) = run_persona(&config_path, &["tasks", "list"]);
    assert!(tasks.contains("[open]  fix the fence"), "tasks={}", tasks);
}

#[test]
fn test_special_prompt_celebrates_when_done() {
    let (_tmp, config_path) = indexed_env();

    let (stdout, _, success) = run_persona(&config_path, &["tasks", "complete", "1"]);
    assert!(success);
    assert!(stdout.contains("Task 1 marked completed."));

    let (again, _, success) = run_persona(&config_path, &["tasks", "complete", "1"]);
    assert!(success);
    assert!(again.contains("already completed"));

    let (stdout, _, success) = run_persona(&config_path, &["prompt", "hello", "--special", "be_my_boss"]);
    assert!(success);
    assert!(stdout.contains("Nothing left to do!"));
    assert!(!stdout.contains("active task:"));
    assert!(stdout.contains("Harry just texted you: hello"));
}

#[test]
fn test_complete_unknown_task_fails() {
    let (_tmp, config_path) = setup_test_env();
    let (_, stderr, success) = run_persona(&config_path, &["tasks", "complete", "99"]);
    assert!(!success);
    assert!(stderr.contains("No task with id 99"));
}

#[test]
fn test_ask_without_api_key_fails_cleanly() {
    let (tmp, config_path) = indexed_env();

    let (_, stderr, success) = run_persona(&config_path, &["ask", "hi", "--session", "s1"]);
    assert!(!success);
    assert!(stderr.contains("ANTHROPIC_API_KEY"), "stderr={}", stderr);
    assert!(!tmp.path().join("data/chat_logs/s1.json").exists());
}

#[test]
fn test_invalid_config_rejected() {
    let (_tmp, config_path) = setup_test_env();
    let content = fs::read_to_string(&config_path).unwrap();
    fs::write(&config_path, content.replace("other_label = \"Harry\"", "other_label = \"Kate\"")).unwrap();

    let (_, stderr, success) = run_persona(&config_path, &["init"]);
    assert!(!success);
    assert!(stderr.contains("must differ"));
}

#[test]
fn test_parallel_completions_across_processes() {
    let (tmp, config_path) = setup_test_env();
    let tasks: Vec<String> = (1..=12)
        .map(|i| format!(r#"{{"id": {}, "task": "chore {}", "completed": false}}"#, i, i))
        .collect();
    fs::write(tmp.path().join("data/tasks.json"), format!("[{}]", tasks.join(","))).unwrap();

    let children: Vec<_> = (1..=12)
        .map(|id| {
            Command::new(persona_binary())
                .arg("--config")
                .arg(&config_path)
                .args(["tasks", "complete", &id.to_string()])
                .stdout(std::process::Stdio::null())
                .spawn()
                .unwrap()
        })
        .collect();
    for mut child in children {
        assert!(child.wait().unwrap().success());
    }

    let (stdout, _, success) = run_persona(&config_path, &["tasks", "list"]);
    assert!(success);
    assert!(stdout.contains("0 of 12 remaining"), "stdout={}", stdout);
}
