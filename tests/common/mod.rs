use std::fs;
use std::path::PathBuf;
use std::process::{Command, ExitStatus};

pub struct CmdResult {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    /// Transcript of the run, kept after the test for failure triage.
    pub log_path: PathBuf,
}

/// Path of a recorded fixture under `tests/fixtures`.
pub fn fixture(name: &str) -> String {
    let path: PathBuf = [env!("CARGO_MANIFEST_DIR"), "tests", "fixtures", name].iter().collect();
    path.to_string_lossy().into_owned()
}

pub fn run_cli_case(case_name: &str, args: &[&str]) -> CmdResult {
    run_cli_case_with_env(case_name, args, &[])
}

/// Run `pvcwatch` with a throwaway HOME and none of the caller's `PVCW_*`
/// settings, then record the transcript under the temp dir.
pub fn run_cli_case_with_env(case_name: &str, args: &[&str], env: &[(&str, &str)]) -> CmdResult {
    let home = tempfile::tempdir().expect("isolated home");
    let bin = env!("CARGO_BIN_EXE_pvcwatch");

    let mut command = Command::new(bin);
    command.args(args).env("HOME", home.path()).env("RUST_BACKTRACE", "1");
    for (key, _) in std::env::vars_os() {
        if key.to_string_lossy().starts_with("PVCW_") {
            command.env_remove(key);
        }
    }
    command.env_remove("K8S_NAMESPACE").envs(env.iter().copied());
    let output = command.output().expect("run pvcwatch");

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

    let log_dir = std::env::temp_dir().join("pvcwatch-test-logs");
    fs::create_dir_all(&log_dir).expect("test log dir");
    let slug: String = case_name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    let log_path = log_dir.join(format!("{slug}-{}.log", std::process::id()));
    let transcript = format!(
        "case: {case_name}\ncommand: {bin} {}\nenv: {env:?}\nexit: {}\n\n[stdout]\n{stdout}\n[stderr]\n{stderr}\n",
        args.join(" "),
        output.status,
    );
    fs::write(&log_path, transcript).expect("write test log");

    CmdResult {
        status: output.status,
        stdout,
        stderr,
        log_path,
    }
}
