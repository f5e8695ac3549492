#![allow(dead_code)]

use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

/// Variables that would leak the developer's own setup into a test run.
const SCRUBBED_ENV: &[&str] = &[
    "BASTION_DB",
    "BASTION_TOKEN",
    "BASTION_REG_SECRET",
    "BASTION_AGENT_REG_SECRET",
    "BASTION_AGENT_PORT",
];

pub fn bastion_bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_bastion"))
}

pub fn run_cli(home: &Path, args: &[&str], envs: &[(&str, &str)]) -> Output {
    let mut cmd = Command::new(bastion_bin());
    for key in SCRUBBED_ENV {
        cmd.env_remove(key);
    }
    cmd.env("BASTION_HOME", home).env("RUST_LOG", "error");
    cmd.args(args);
    for (key, value) in envs {
        cmd.env(key, value);
    }
    cmd.output().expect("failed to execute bastion CLI")
}

pub fn assert_cli_success(output: &Output, args: &[&str]) {
    assert!(
        output.status.success(),
        "command failed: {}\nstdout:\n{}\nstderr:\n{}",
        args.join(" "),
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
}

pub fn run_cli_ok(home: &Path, args: &[&str], envs: &[(&str, &str)]) -> String {
    let output = run_cli(home, args, envs);
    assert_cli_success(&output, args);
    String::from_utf8_lossy(&output.stdout).into_owned()
}

pub fn run_cli_json_value(home: &Path, args: &[&str], envs: &[(&str, &str)]) -> serde_json::Value {
    let stdout = run_cli_ok(home, args, envs);
    let json_start = stdout
        .find(|c| c == '{' || c == '[')
        .unwrap_or_else(|| panic!("no JSON payload found in output\nstdout:\n{}", stdout));
    let mut deserializer = serde_json::Deserializer::from_str(&stdout[json_start..]);
    serde_json::Value::deserialize(&mut deserializer)
        .unwrap_or_else(|err| panic!("failed to parse JSON output: {}\nstdout:\n{}", err, stdout))
}

pub fn run_cli_json<T: DeserializeOwned>(home: &Path, args: &[&str], envs: &[(&str, &str)]) -> T {
    let value = run_cli_json_value(home, args, envs);
    serde_json::from_value(value).expect("failed to deserialize JSON output")
}

/// Run `bastion init` and return the bootstrap admin secret it prints.
pub fn init_home(home: &Path) -> String {
    let stdout = run_cli_ok(home, &["init"], &[]);
    stdout
        .lines()
        .find_map(|line| line.trim().strip_prefix("export BASTION_TOKEN="))
        .map(str::to_string)
        .unwrap_or_else(|| panic!("init printed no admin secret\nstdout:\n{}", stdout))
}
