use autopara::core::io::jsonl::read_records;
use autopara::core::models::record::ResultRecord;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use tempfile::TempDir;

const LJ_CONFIG: &str = r#"
[calculator.backend]
type = "lennard-jones"
epsilon = 0.0104
sigma = 3.4
min-distance = 0.5

[evaluation]
properties = ["energy", "forces"]
output-prefix = "lj_"

[rundir]
keep-files = "none"
"#;

struct Fixture {
    dir: TempDir,
}

impl Fixture {
    fn new(n: usize, bad: Option<usize>) -> Self {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("autopara.toml"), LJ_CONFIG).unwrap();

        let mut lines = String::new();
        for i in 0..n {
            let distance = if Some(i) == bad {
                0.1
            } else {
                3.6 + 0.05 * i as f64
            };
            let structure = serde_json::json!({
                "symbols": ["Ar", "Ar"],
                "positions": [[0.0, 0.0, 0.0], [distance, 0.0, 0.0]],
                "info": {"id": i},
            });
            lines.push_str(&structure.to_string());
            lines.push('\n');
        }
        fs::write(dir.path().join("inputs.jsonl"), lines).unwrap();
        Self { dir }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn run(&self, output: &str, extra: &[&str]) -> Output {
        let workdir = self.path("calcs");
        let mut command = Command::new(env!("CARGO_BIN_EXE_autopara"));
        command
            .arg("run")
            .arg("-i")
            .arg(self.path("inputs.jsonl"))
            .arg("-o")
            .arg(self.path(output))
            .arg("-c")
            .arg(self.path("autopara.toml"))
            .arg("--workdir")
            .arg(&workdir)
            .args(extra)
            .env_remove("AUTOPARA_NUM_WORKERS")
            .env_remove("AUTOPARA_INPUTS_PER_WORKER");
        command.output().unwrap()
    }

    fn status(&self, output: &str) -> String {
        let out = Command::new(env!("CARGO_BIN_EXE_autopara"))
            .arg("status")
            .arg("-o")
            .arg(self.path(output))
            .output()
            .unwrap();
        assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
        String::from_utf8_lossy(&out.stdout).into_owned()
    }
}

fn assert_success(output: &Output) {
    assert!(
        output.status.success(),
        "command failed\nstdout: {}\nstderr: {}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
}

fn records(path: &Path) -> Vec<ResultRecord> {
    read_records(path).unwrap()
}

#[test]
fn parallel_run_writes_ordered_records_with_failure_in_place() {
    let fixture = Fixture::new(23, Some(7));

    let output = fixture.run("out.jsonl", &["-n", "2", "--chunk-size", "10"]);
    assert_success(&output);

    let out = records(&fixture.path("out.jsonl"));
    assert_eq!(out.len(), 23);
    for (i, record) in out.iter().enumerate() {
        assert_eq!(record.index(), i);
        assert_eq!(record.structure().info["id"], i);
        assert_eq!(record.is_failed(), i == 7, "record {i}");
        if !record.is_failed() {
            assert!(record.structure().info.contains_key("lj_energy"));
            assert!(record.structure().arrays.contains_key("lj_forces"));
        }
    }
    assert!(!fixture.path("out.jsonl.partial").exists());
}

#[test]
fn serial_and_parallel_runs_agree() {
    let fixture = Fixture::new(17, Some(3));

    assert_success(&fixture.run("serial.jsonl", &["--chunk-size", "4"]));
    assert_success(&fixture.run("parallel.jsonl", &["-n", "3", "--chunk-size", "2"]));

    assert_eq!(
        records(&fixture.path("serial.jsonl")),
        records(&fixture.path("parallel.jsonl"))
    );
}

#[test]
fn interrupted_run_resumes_to_the_same_output() {
    let fixture = Fixture::new(12, None);
    assert_success(&fixture.run("reference.jsonl", &[]));
    let reference = fs::read_to_string(fixture.path("reference.jsonl")).unwrap();

    // Five stored records followed by a line that was cut off mid-write.
    let head: Vec<&str> = reference.lines().take(6).collect();
    let mut partial = head[..5].join("\n");
    partial.push('\n');
    partial.push_str(&head[5][..head[5].len() / 2]);
    fs::write(fixture.path("resumed.jsonl.partial"), partial).unwrap();
    assert!(fixture.status("resumed.jsonl").contains("partial, 5 record(s)"));

    let output = fixture.run("resumed.jsonl", &["-n", "2", "--chunk-size", "3"]);
    assert_success(&output);
    assert!(String::from_utf8_lossy(&output.stdout).contains("Resumed after 5"));

    assert_eq!(
        records(&fixture.path("resumed.jsonl")),
        records(&fixture.path("reference.jsonl"))
    );
}

#[test]
fn rerunning_a_complete_output_changes_nothing() {
    let fixture = Fixture::new(4, None);
    assert_success(&fixture.run("out.jsonl", &[]));
    let first = fs::read(fixture.path("out.jsonl")).unwrap();

    // The input is gone; a complete destination must not need it.
    fs::remove_file(fixture.path("inputs.jsonl")).unwrap();
    let output = fixture.run("out.jsonl", &[]);
    assert_success(&output);
    assert!(String::from_utf8_lossy(&output.stdout).contains("already complete"));
    assert_eq!(fs::read(fixture.path("out.jsonl")).unwrap(), first);
}

#[test]
fn status_reports_each_state() {
    let fixture = Fixture::new(3, Some(1));
    assert!(fixture.status("out.jsonl").contains("absent"));

    assert_success(&fixture.run("out.jsonl", &[]));
    assert!(
        fixture
            .status("out.jsonl")
            .contains("complete, 3 record(s) (1 failed)")
    );
}

#[test]
fn invalid_configuration_fails_before_any_output() {
    let fixture = Fixture::new(3, None);

    let output = fixture.run("out.jsonl", &["-n", "0"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("num_workers"));
    assert!(!fixture.path("out.jsonl").exists());
}

#[test]
fn parallel_run_on_scratch_moves_everything_home() {
    let fixture = Fixture::new(8, Some(2));
    let scratch = fixture.path("scratch");
    fs::create_dir(&scratch).unwrap();

    let output = fixture.run(
        "out.jsonl",
        &[
            "-n",
            "2",
            "--chunk-size",
            "3",
            "--scratchdir",
            scratch.to_str().unwrap(),
        ],
    );
    assert_success(&output);

    let out = records(&fixture.path("out.jsonl"));
    assert_eq!(out.len(), 8);
    for (i, record) in out.iter().enumerate() {
        assert_eq!(record.index(), i);
        assert_eq!(record.is_failed(), i == 2, "record {i}");
    }
    assert_eq!(fs::read_dir(&scratch).unwrap().count(), 0);
    // only the failed calculation keeps its run directory
    assert_eq!(fs::read_dir(fixture.path("calcs")).unwrap().count(), 1);
}

#[test]
fn worker_logs_to_stderr_and_answers_only_protocol_on_stdout() {
    let fixture = Fixture::new(0, None);
    let init = serde_json::json!({
        "kind": "init",
        "job": {
            "factory": "autopara::builtin",
            "calculator": { "backend": { "type": "lennard-jones" } },
            "settings": {
                "properties": ["energy"],
                "output-prefix": "lj_",
                "rundir": { "workdir": fixture.path("calcs") }
            }
        }
    });

    let mut child = Command::new(env!("CARGO_BIN_EXE_autopara"))
        .args(["-vv", "worker"])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();
    let mut stdin = child.stdin.take().unwrap();
    writeln!(stdin, "{init}").unwrap();
    writeln!(stdin, "{}", serde_json::json!({ "kind": "shutdown" })).unwrap();
    drop(stdin);
    let output = child.wait_with_output().unwrap();

    assert_success(&output);
    assert_eq!(String::from_utf8_lossy(&output.stdout), "{\"kind\":\"ready\"}\n");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Worker ready for the handshake."), "{stderr}");
}
