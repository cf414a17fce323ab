use std::fs;
use std::path::Path;
use std::process::Command;

use tempfile::tempdir;

fn seed(dir: &Path) {
    let data = dir.join("experiment_data");
    fs::create_dir_all(&data).unwrap();
    fs::write(
        data.join("target_questions.csv"),
        "id,question,unit\n1,How many piano tuners are in Chicago?,tuners\n",
    )
    .unwrap();
    fs::write(
        data.join("prompts.csv"),
        "turn,prompt,prefix,postfix\ncontext,simple,,\ntarget,onlyanswer,,Answer in [unit].\n",
    )
    .unwrap();
}

fn fermi(dir: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_fermi"));
    cmd.arg("--data-dir")
        .arg(dir)
        .env_remove("OPENAI_API_KEY")
        .env_remove("TOGETHER_API_KEY");
    cmd
}

#[test]
fn debug_run_writes_mock_responses() {
    let dir = tempdir().unwrap();
    seed(dir.path());

    let status = fermi(dir.path())
        .args(["run", "--debug", "--samples", "2"])
        .status()
        .unwrap();
    assert!(status.success());

    let table = dir
        .path()
        .join("results/gpt-3.5-turbo/onlyanswer/DEBUGneutral_target_responses.csv");
    let mut reader = csv::Reader::from_path(&table).unwrap();
    let rows: Vec<csv::StringRecord> = reader.records().map(Result::unwrap).collect();
    assert_eq!(rows.len(), 2);
    let headers = reader.headers().unwrap().clone();
    let col = |name: &str| headers.iter().position(|h| h == name).unwrap();
    for (sample, row) in rows.iter().enumerate() {
        assert_eq!(&row[col("sample")], sample.to_string());
        assert_eq!(&row[col("context")], "single_turn");
        assert_eq!(&row[col("experiment_type")], "neutral");
        assert_eq!(&row[col("response")], "Mock response");
    }
}

#[test]
fn debug_batch_run_writes_jsonl_without_submitting() {
    let dir = tempdir().unwrap();
    seed(dir.path());

    let status = fermi(dir.path())
        .args(["run", "--debug", "--as-batch", "--samples", "3"])
        .status()
        .unwrap();
    assert!(status.success());

    let file = dir.path().join(
        "batches/gpt-3.5-turbo/onlyanswer_neutral_single_turn_context_neutral_batch.jsonl",
    );
    let raw = fs::read_to_string(file).unwrap();
    let lines: Vec<serde_json::Value> = raw
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[2]["custom_id"], "1/2/single_turn/simple/none/onlyanswer/neutral");
    assert_eq!(lines[0]["body"]["temperature"], 0.8);
    assert!(!dir.path().join("results").exists());
}

#[test]
fn unsupported_experiment_type_fails_before_writing() {
    let dir = tempdir().unwrap();
    seed(dir.path());

    let output = fermi(dir.path())
        .args(["run", "--debug", "--experiment-type", "sideways"])
        .output()
        .unwrap();
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("sideways"));
    assert!(!dir.path().join("results").exists());
}

#[test]
fn unknown_model_is_rejected() {
    let dir = tempdir().unwrap();
    seed(dir.path());

    let status = fermi(dir.path())
        .args(["run", "--debug", "--model", "claude-3"])
        .status()
        .unwrap();
    assert!(!status.success());
}
