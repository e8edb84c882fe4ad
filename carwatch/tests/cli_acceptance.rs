use carwatch_core::{Database, Snapshot};
use chrono::{TimeZone, Utc};
use std::ffi::OsString;
use std::fs;
use std::path::PathBuf;
use std::process::{Command, Output};
use tempfile::TempDir;

struct CliTestEnv {
    _temp_dir: TempDir,
    home: PathBuf,
    xdg_data: PathBuf,
    xdg_config: PathBuf,
    xdg_state: PathBuf,
}

impl CliTestEnv {
    fn new() -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let base = temp_dir.path().to_path_buf();
        let home = base.join("home");
        let xdg_data = base.join("xdg-data");
        let xdg_config = base.join("xdg-config");
        let xdg_state = base.join("xdg-state");

        fs::create_dir_all(&home).expect("failed to create HOME");
        fs::create_dir_all(&xdg_data).expect("failed to create XDG_DATA_HOME");
        fs::create_dir_all(&xdg_config).expect("failed to create XDG_CONFIG_HOME");
        fs::create_dir_all(&xdg_state).expect("failed to create XDG_STATE_HOME");

        Self {
            _temp_dir: temp_dir,
            home,
            xdg_data,
            xdg_config,
            xdg_state,
        }
    }

    fn db_path(&self) -> PathBuf {
        self.xdg_data.join("carwatch/carwatch.db")
    }

    fn write_config(&self, contents: &str) -> PathBuf {
        let path = self.xdg_config.join("carwatch/config.toml");
        fs::create_dir_all(path.parent().expect("missing config parent"))
            .expect("failed to create config dir");
        fs::write(&path, contents).expect("failed to write config");
        path
    }
}

fn run_bin(env: &CliTestEnv, args: &[&str]) -> Output {
    let bin_path = PathBuf::from(assert_cmd::cargo::cargo_bin!("carwatch"));

    Command::new(bin_path)
        .args(args)
        .env("HOME", &env.home)
        .env("XDG_DATA_HOME", &env.xdg_data)
        .env("XDG_CONFIG_HOME", &env.xdg_config)
        .env("XDG_STATE_HOME", &env.xdg_state)
        .env_remove("RUST_LOG")
        .output()
        .unwrap_or_else(|e| panic!("failed to execute carwatch: {e}"))
}

fn describe(args: &[&str], output: &Output) -> String {
    let rendered_args = args
        .iter()
        .map(|arg| OsString::from(arg).to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(" ");
    format!(
        "carwatch {rendered_args}\nstatus: {}\nstdout:\n{}\nstderr:\n{}",
        output.status,
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    )
}

fn assert_success(args: &[&str], output: &Output) {
    if !output.status.success() {
        panic!("command failed\n{}", describe(args, output));
    }
}

fn assert_exit_code(args: &[&str], output: &Output, code: i32) {
    assert_eq!(
        output.status.code(),
        Some(code),
        "unexpected exit status\n{}",
        describe(args, output)
    );
}

#[test]
fn status_on_empty_sandbox_reports_defaults() {
    let env = CliTestEnv::new();

    let args = ["status"];
    let output = run_bin(&env, &args);
    assert_success(&args, &output);

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("(not found, using defaults)"), "{stdout}");
    assert!(stdout.contains("Vehicle:   (not set)"), "{stdout}");
    assert!(stdout.contains("Broker:    disabled"), "{stdout}");
    assert!(stdout.contains("Snapshots: 0 (no database yet)"), "{stdout}");
    assert!(
        !env.db_path().exists(),
        "status must not create the database"
    );
}

#[test]
fn status_reports_stored_snapshots() {
    let env = CliTestEnv::new();
    let db_path = env.db_path();
    fs::create_dir_all(db_path.parent().expect("missing db parent"))
        .expect("failed to create data dir");

    let db = Database::open(&db_path).expect("failed to open db");
    db.migrate().expect("failed to migrate db");
    let first = Utc.timestamp_millis_opt(1_699_999_000_000).unwrap();
    let latest = Utc.timestamp_millis_opt(1_700_000_000_000).unwrap();
    db.insert_snapshot(&Snapshot::new(b"{}".to_vec(), first, false, false))
        .expect("failed to insert");
    db.insert_snapshot(&Snapshot::new(b"{}".to_vec(), latest, true, false))
        .expect("failed to insert");
    drop(db);

    let args = ["status"];
    let output = run_bin(&env, &args);
    assert_success(&args, &output);

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Snapshots: 2"), "{stdout}");
    assert!(stdout.contains("Latest:    2023-11-14 22:13:20 UTC"), "{stdout}");
}

#[test]
fn status_reads_config_file_and_flags() {
    let env = CliTestEnv::new();
    let config_path = env.write_config(
        r#"
[vehicle]
name = "Roadrunner"

[broker]
enabled = true
host = "mqtt.local"
topic = "car/telemetry"
"#,
    );
    let config_arg = config_path.to_string_lossy().into_owned();

    let args = ["--config", config_arg.as_str(), "--broker-port", "8883", "status"];
    let output = run_bin(&env, &args);
    assert_success(&args, &output);

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Vehicle:   Roadrunner"), "{stdout}");
    assert!(stdout.contains("Broker:    mqtt.local:8883 topic car/telemetry"), "{stdout}");
}

#[test]
fn gather_rejects_missing_vehicle_name() {
    let env = CliTestEnv::new();

    let args = ["gather"];
    let output = run_bin(&env, &args);
    assert_exit_code(&args, &output, 1);

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("vehicle.name is required"), "{stderr}");
    assert!(!env.db_path().exists());
}

#[test]
fn bridge_requires_a_broker() {
    let env = CliTestEnv::new();

    let args = ["bridge", "--no-broker"];
    let output = run_bin(&env, &args);
    assert_exit_code(&args, &output, 1);

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("bridge mode needs"), "{stderr}");
}

#[test]
fn malformed_config_is_reported() {
    let env = CliTestEnv::new();
    env.write_config("[vehicle\nname = ");

    let args = ["status"];
    let output = run_bin(&env, &args);
    assert_exit_code(&args, &output, 1);

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("failed to load configuration"), "{stderr}");
}

#[test]
fn gather_without_credentials_exits_fatal() {
    let env = CliTestEnv::new();

    let args = ["gather", "--vehicle", "Roadrunner", "--no-broker"];
    let output = run_bin(&env, &args);
    assert_exit_code(&args, &output, 1);

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("gatherer"), "{stderr}");
    assert!(env.db_path().exists(), "database should be opened before polling");
    assert!(env.xdg_state.join("carwatch").is_dir());
}
