//! Verification engine: evaluates success criteria against the repository.
//!
//! Verification never fails as a whole. Every criterion produces a result, and
//! errors while evaluating one become a failed result carrying the error text.

use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use glob::Pattern;
use regex::{Regex, RegexBuilder};
use serde_json::Value;
use tracing::{debug, info, instrument};

use crate::core::baseline::{FileBaseline, compile_patterns};
use crate::core::criteria::{Criterion, parse_criterion};
use crate::core::expr::{ExprHost, evaluate_str};
use crate::core::types::{VerificationReport, VerificationResult};
use crate::io::baseline::BaselineScanner;
use crate::io::config::MissionConfig;
use crate::io::process::{run_command_with_timeout, shell_command, tail_lines};

pub const NO_CLOBBER: &str = "no_clobber";

static COVERAGE_TOTAL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^TOTAL\s+.*?(\d+(?:\.\d+)?)%\s*$").expect("coverage pattern should be valid")
});

/// Limits applied to command-backed criteria.
#[derive(Debug, Clone)]
pub struct VerifyLimits {
    pub timeout: Duration,
    pub output_limit_bytes: usize,
    pub tail_lines: usize,
    pub coverage_command: String,
}

impl Default for VerifyLimits {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(600),
            output_limit_bytes: 100_000,
            tail_lines: 20,
            coverage_command: "pytest --cov --cov-report=term".to_string(),
        }
    }
}

impl VerifyLimits {
    pub fn from_config(cfg: &MissionConfig) -> Self {
        Self {
            timeout: Duration::from_secs(cfg.verify_timeout_secs),
            output_limit_bytes: cfg.verify_output_limit_bytes,
            tail_lines: cfg.detail_tail_lines,
            coverage_command: cfg.coverage_command.clone(),
        }
    }
}

pub struct Verifier {
    scanner: BaselineScanner,
    limits: VerifyLimits,
}

impl Verifier {
    pub fn new(scanner: BaselineScanner, limits: VerifyLimits) -> Self {
        Self { scanner, limits }
    }

    pub fn root(&self) -> &Path {
        self.scanner.root()
    }

    /// Capture the pre-execution baseline with the same exclusions used later.
    pub fn capture_baseline(&self) -> Result<FileBaseline> {
        self.scanner.capture()
    }

    /// Evaluate every criterion, plus `no_clobber` when files are protected.
    #[instrument(skip_all, fields(criteria = criteria.len(), protected = protected_files.len()))]
    pub fn verify(
        &self,
        criteria: &[String],
        baseline: Option<&FileBaseline>,
        protected_files: &[String],
    ) -> VerificationReport {
        let mut current: Option<FileBaseline> = None;
        let mut results = Vec::with_capacity(criteria.len() + 1);

        if !protected_files.is_empty() {
            let result = self
                .check_no_clobber(baseline, protected_files, &mut current)
                .unwrap_or_else(|err| failed_with_error(NO_CLOBBER, &err));
            results.push(result);
        }

        for raw in criteria {
            let result = self
                .check_criterion(raw, baseline, &mut current)
                .unwrap_or_else(|err| failed_with_error(raw, &err));
            debug!(criterion = %raw, passed = result.passed, "criterion evaluated");
            results.push(result);
        }

        let report = VerificationReport::from_results(results);
        info!(
            all_passed = report.all_passed,
            failed = report.failed().count(),
            "verification finished"
        );
        report
    }

    fn check_criterion(
        &self,
        raw: &str,
        baseline: Option<&FileBaseline>,
        current: &mut Option<FileBaseline>,
    ) -> Result<VerificationResult> {
        let criterion = parse_criterion(raw)?;
        match criterion {
            Criterion::Exists { path } => self.check_exists(raw, &path),
            Criterion::Contains { path, pattern } => self.check_contains(raw, &path, &pattern),
            Criterion::NotContains { path, pattern } => {
                self.check_not_contains(raw, &path, &pattern)
            }
            Criterion::NoNewFiles => self.check_no_new_files(raw, baseline, current),
            Criterion::Eval { expression } => self.check_eval(raw, &expression),
            Criterion::Coverage { threshold } => self.check_coverage(raw, threshold),
            Criterion::Shell { command } => self.check_shell(raw, &command),
        }
    }

    fn current_baseline<'a>(
        &self,
        current: &'a mut Option<FileBaseline>,
    ) -> Result<&'a FileBaseline> {
        if current.is_none() {
            *current = Some(self.scanner.capture()?);
        }
        current
            .as_ref()
            .ok_or_else(|| anyhow!("current file state unavailable"))
    }

    fn check_no_clobber(
        &self,
        baseline: Option<&FileBaseline>,
        protected_files: &[String],
        current: &mut Option<FileBaseline>,
    ) -> Result<VerificationResult> {
        let Some(baseline) = baseline else {
            return Ok(VerificationResult::fail(
                NO_CLOBBER,
                "No baseline captured; cannot check protected files",
            ));
        };
        let patterns: Vec<Pattern> = compile_patterns(protected_files).map_err(|err| anyhow!(err))?;
        let current = self.current_baseline(current)?;
        let clobbered = baseline.clobbered(current, &patterns);
        if clobbered.is_empty() {
            return Ok(VerificationResult::pass(
                NO_CLOBBER,
                "No protected files were modified",
            ));
        }
        let mut message = String::from("Protected files were modified");
        if !clobbered.modified.is_empty() {
            message.push_str(&format!(": {}", clobbered.modified.join(", ")));
        }
        if !clobbered.deleted.is_empty() {
            message.push_str(&format!(" (deleted: {})", clobbered.deleted.join(", ")));
        }
        Ok(VerificationResult::fail(NO_CLOBBER, message)
            .with_detail("clobbered_files", string_list(&clobbered.modified))
            .with_detail("deleted_files", string_list(&clobbered.deleted)))
    }

    fn check_exists(&self, raw: &str, path: &str) -> Result<VerificationResult> {
        let full = resolve_in_repo(self.root(), path)?;
        let passed = full.exists();
        Ok(VerificationResult::new(
            raw,
            passed,
            format!("Path {path} exists: {passed}"),
        ))
    }

    fn check_contains(&self, raw: &str, path: &str, pattern: &str) -> Result<VerificationResult> {
        let full = resolve_in_repo(self.root(), path)?;
        if !full.is_file() {
            return Ok(VerificationResult::fail(raw, format!("File {path} not found")));
        }
        let re = build_regex(pattern)?;
        let contents = read_text(&full)?;
        let passed = re.is_match(&contents);
        let message = if passed {
            format!("Pattern '{pattern}' found in {path}")
        } else {
            format!("Pattern '{pattern}' not found in {path}")
        };
        Ok(VerificationResult::new(raw, passed, message))
    }

    fn check_not_contains(
        &self,
        raw: &str,
        path: &str,
        pattern: &str,
    ) -> Result<VerificationResult> {
        let full = resolve_in_repo(self.root(), path)?;
        let re = build_regex(pattern)?;
        if !full.is_file() {
            return Ok(VerificationResult::pass(
                raw,
                format!("File {path} not found; pattern '{pattern}' is absent"),
            )
            .with_detail("file_missing", true));
        }
        let contents = read_text(&full)?;
        let passed = !re.is_match(&contents);
        let message = if passed {
            format!("Pattern '{pattern}' absent from {path}")
        } else {
            format!("Forbidden pattern '{pattern}' found in {path}")
        };
        Ok(VerificationResult::new(raw, passed, message))
    }

    fn check_no_new_files(
        &self,
        raw: &str,
        baseline: Option<&FileBaseline>,
        current: &mut Option<FileBaseline>,
    ) -> Result<VerificationResult> {
        let Some(baseline) = baseline else {
            return Ok(VerificationResult::fail(
                raw,
                "No baseline captured; cannot detect new files",
            ));
        };
        let current = self.current_baseline(current)?;
        let new_files = baseline.new_files(current);
        if new_files.is_empty() {
            return Ok(VerificationResult::pass(raw, "No new files were created"));
        }
        Ok(VerificationResult::fail(
            raw,
            format!("New files were created: {}", new_files.join(", ")),
        )
        .with_detail("new_files", string_list(&new_files)))
    }

    fn check_eval(&self, raw: &str, expression: &str) -> Result<VerificationResult> {
        let host = RepoHost { root: self.root() };
        let value = evaluate_str(expression, &host)?;
        let passed = value.truthy();
        Ok(VerificationResult::new(
            raw,
            passed,
            format!("Eval '{expression}' returned {value}"),
        ))
    }

    fn check_coverage(&self, raw: &str, threshold: f64) -> Result<VerificationResult> {
        let command = self.limits.coverage_command.clone();
        let output = run_command_with_timeout(
            shell_command(&command, self.root()),
            None,
            self.limits.timeout,
            self.limits.output_limit_bytes,
        )
        .with_context(|| format!("run coverage command '{command}'"))?;
        let stdout = output.stdout_text();
        let stderr = output.stderr_text();
        let base = |result: VerificationResult| {
            result
                .with_detail("exit_code", output.exit_code())
                .with_detail("timed_out", output.timed_out)
                .with_detail("stdout", tail_lines(&stdout, self.limits.tail_lines))
                .with_detail("stderr", tail_lines(&stderr, self.limits.tail_lines))
        };

        if output.timed_out {
            return Ok(base(VerificationResult::fail(
                raw,
                format!(
                    "Coverage command timed out after {}s",
                    self.limits.timeout.as_secs()
                ),
            )));
        }
        let Some(percent) = parse_coverage_total(&stdout) else {
            return Ok(base(VerificationResult::fail(
                raw,
                "Could not find coverage TOTAL line in output",
            )));
        };
        let passed = percent >= threshold;
        Ok(base(VerificationResult::new(
            raw,
            passed,
            format!("Coverage {percent}% (required {threshold}%)"),
        ))
        .with_detail("coverage", percent))
    }

    fn check_shell(&self, raw: &str, command: &str) -> Result<VerificationResult> {
        let output = run_command_with_timeout(
            shell_command(command, self.root()),
            None,
            self.limits.timeout,
            self.limits.output_limit_bytes,
        )
        .with_context(|| format!("run '{command}'"))?;
        let exit_code = output.exit_code();
        let passed = !output.timed_out && exit_code == 0;
        let message = if output.timed_out {
            format!(
                "Command '{command}' timed out after {}s",
                self.limits.timeout.as_secs()
            )
        } else {
            format!("Command '{command}' exited with code {exit_code}")
        };
        Ok(VerificationResult::new(raw, passed, message)
            .with_detail("exit_code", exit_code)
            .with_detail("timed_out", output.timed_out)
            .with_detail(
                "stdout",
                tail_lines(&output.stdout_text(), self.limits.tail_lines),
            )
            .with_detail(
                "stderr",
                tail_lines(&output.stderr_text(), self.limits.tail_lines),
            ))
    }
}

/// Percentage from a coverage report's `TOTAL` row.
pub fn parse_coverage_total(output: &str) -> Option<f64> {
    COVERAGE_TOTAL_RE
        .captures(output)
        .and_then(|caps| caps.get(1))
        .and_then(|found| found.as_str().parse().ok())
}

fn failed_with_error(criterion: &str, err: &anyhow::Error) -> VerificationResult {
    VerificationResult::fail(criterion, format!("Error evaluating '{criterion}': {err:#}"))
        .with_detail("error", format!("{err:#}"))
}

fn string_list(items: &[String]) -> Value {
    Value::Array(items.iter().cloned().map(Value::String).collect())
}

fn build_regex(pattern: &str) -> Result<Regex> {
    RegexBuilder::new(pattern)
        .multi_line(true)
        .dot_matches_new_line(true)
        .build()
        .with_context(|| format!("invalid regex '{pattern}'"))
}

fn read_text(path: &Path) -> Result<String> {
    let bytes = fs::read(path).with_context(|| format!("read {}", path.display()))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Join a relative path onto the repo root, refusing anything that escapes it.
pub fn resolve_in_repo(root: &Path, relative: &str) -> Result<PathBuf> {
    let candidate = Path::new(relative);
    if candidate.is_absolute() {
        return Err(anyhow!("path '{relative}' must be relative to the repository"));
    }
    if candidate
        .components()
        .any(|component| matches!(component, Component::ParentDir | Component::Prefix(_)))
    {
        return Err(anyhow!("path '{relative}' escapes the repository"));
    }
    Ok(root.join(candidate))
}

/// Expression host confined to one repository.
struct RepoHost<'a> {
    root: &'a Path,
}

impl RepoHost<'_> {
    fn resolve(&self, path: &str) -> Result<PathBuf, String> {
        resolve_in_repo(self.root, path).map_err(|err| err.to_string())
    }
}

impl ExprHost for RepoHost<'_> {
    fn exists(&self, path: &str) -> Result<bool, String> {
        Ok(self.resolve(path)?.exists())
    }

    fn is_file(&self, path: &str) -> Result<bool, String> {
        Ok(self.resolve(path)?.is_file())
    }

    fn is_dir(&self, path: &str) -> Result<bool, String> {
        Ok(self.resolve(path)?.is_dir())
    }

    fn read(&self, path: &str) -> Result<String, String> {
        let full = self.resolve(path)?;
        read_text(&full).map_err(|err| format!("{err:#}"))
    }

    fn size(&self, path: &str) -> Result<u64, String> {
        let full = self.resolve(path)?;
        fs::metadata(&full)
            .map(|meta| meta.len())
            .map_err(|err| format!("stat {path}: {err}"))
    }

    fn glob_count(&self, pattern: &str) -> Result<usize, String> {
        self.resolve(pattern)?;
        let escaped_root = Pattern::escape(&self.root.to_string_lossy());
        let full = format!("{escaped_root}/{pattern}");
        let paths = glob::glob(&full).map_err(|err| format!("invalid glob '{pattern}': {err}"))?;
        Ok(paths.filter_map(Result::ok).count())
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    fn verifier(root: &Path) -> Verifier {
        Verifier::new(
            BaselineScanner::new(root),
            VerifyLimits {
                timeout: Duration::from_secs(10),
                ..VerifyLimits::default()
            },
        )
    }

    fn verify(root: &Path, criteria: &[&str]) -> VerificationReport {
        let criteria = criteria.iter().map(|c| c.to_string()).collect::<Vec<_>>();
        verifier(root).verify(&criteria, None, &[])
    }

    #[test]
    fn exists_and_eval() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("README.md"), "# Title\n").expect("write");
        let report = verify(temp.path(), &["exists: README.md", "eval:1 + 1 == 2"]);
        assert!(report.all_passed);
        assert_eq!(report.results.len(), 2);
        assert_eq!(report.results[1].message, "Eval '1 + 1 == 2' returned true");
    }

    #[test]
    fn missing_path_fails() {
        let temp = tempfile::tempdir().expect("tempdir");
        let report = verify(temp.path(), &["exists:nope.txt"]);
        assert!(!report.all_passed);
        assert_eq!(report.results[0].message, "Path nope.txt exists: false");
    }

    #[test]
    fn contains_and_not_contains_are_inverse_for_existing_files() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("log.txt"), "Build: Success\n").expect("write");
        for pattern in ["Success", "^Build", "Failure"] {
            let contains = format!("contains:log.txt {pattern}");
            let not_contains = format!("not_contains:log.txt {pattern}");
            let report = verify(temp.path(), &[&contains, &not_contains]);
            assert_ne!(report.results[0].passed, report.results[1].passed, "{pattern}");
        }
    }

    #[test]
    fn patterns_match_across_lines() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("log.txt"), "start\nend\n").expect("write");
        let report = verify(
            temp.path(),
            &["contains:log.txt start.*end", "not_contains:log.txt start.*end"],
        );
        assert!(report.results[0].passed, "{}", report.results[0].message);
        assert!(!report.results[1].passed, "{}", report.results[1].message);
    }

    #[test]
    fn not_contains_passes_for_missing_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        let report = verify(temp.path(), &["not_contains:gone.py print", "contains:gone.py print"]);
        assert!(report.results[0].passed);
        assert!(report.results[0].detail_bool("file_missing"));
        assert!(!report.results[1].passed);
        assert_eq!(report.results[1].message, "File gone.py not found");
    }

    #[test]
    fn invalid_regex_becomes_failed_result() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("a.txt"), "x").expect("write");
        let report = verify(temp.path(), &["contains:a.txt (unclosed"]);
        assert!(!report.all_passed);
        assert!(report.results[0].message.starts_with("Error evaluating"));
        assert!(report.results[0].detail_str("error").is_some());
    }

    #[test]
    fn shell_criterion_reports_exit_code_and_tails() {
        let temp = tempfile::tempdir().expect("tempdir");
        let report = verify(
            temp.path(),
            &["true", "echo boom; echo bad 1>&2; exit 4"],
        );
        assert!(report.results[0].passed);
        let failed = &report.results[1];
        assert!(!failed.passed);
        assert_eq!(
            failed.message,
            "Command 'echo boom; echo bad 1>&2; exit 4' exited with code 4"
        );
        assert_eq!(failed.detail_str("stdout"), Some("boom"));
        assert_eq!(failed.detail_str("stderr"), Some("bad"));
    }

    #[test]
    fn shell_criterion_timeout_is_flagged() {
        let temp = tempfile::tempdir().expect("tempdir");
        let verifier = Verifier::new(
            BaselineScanner::new(temp.path()),
            VerifyLimits {
                timeout: Duration::from_millis(200),
                ..VerifyLimits::default()
            },
        );
        let report = verifier.verify(&["exec sleep 5".to_string()], None, &[]);
        let result = &report.results[0];
        assert!(!result.passed);
        assert!(result.detail_bool("timed_out"));
        assert!(result.message.contains("timed out"));
    }

    #[test]
    fn no_new_files_detects_additions() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path();
        fs::write(root.join("a.txt"), "a").expect("write");
        let verifier = verifier(root);
        let baseline = verifier.capture_baseline().expect("baseline");

        let criteria = vec!["no_new_files".to_string()];
        assert!(verifier.verify(&criteria, Some(&baseline), &[]).all_passed);

        fs::write(root.join("b.txt"), "b").expect("write");
        let report = verifier.verify(&criteria, Some(&baseline), &[]);
        assert!(!report.all_passed);
        assert_eq!(report.results[0].detail_list("new_files"), vec!["b.txt".to_string()]);
    }

    #[test]
    fn no_new_files_without_baseline_fails() {
        let temp = tempfile::tempdir().expect("tempdir");
        let report = verify(temp.path(), &["no_new_files"]);
        assert!(!report.all_passed);
    }

    #[test]
    fn no_clobber_lists_exactly_modified_protected_files() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path();
        fs::write(root.join("protected1.txt"), "one").expect("write");
        fs::write(root.join("protected2.txt"), "two").expect("write");
        let verifier = verifier(root);
        let baseline = verifier.capture_baseline().expect("baseline");

        fs::write(root.join("protected1.txt"), "changed").expect("write");
        let report = verifier.verify(
            &["exists:protected2.txt".to_string()],
            Some(&baseline),
            &["protected*.txt".to_string()],
        );
        assert!(!report.all_passed);
        let clobber = &report.results[0];
        assert_eq!(clobber.criterion, NO_CLOBBER);
        assert_eq!(
            clobber.detail_list("clobbered_files"),
            vec!["protected1.txt".to_string()]
        );
        assert!(report.results[1].passed);
    }

    #[test]
    fn paths_may_not_escape_repo() {
        let temp = tempfile::tempdir().expect("tempdir");
        let report = verify(
            temp.path(),
            &["exists:../outside", "eval:exists('/etc/passwd')"],
        );
        assert!(!report.results[0].passed);
        assert!(report.results[0].message.contains("escapes the repository"));
        assert!(!report.results[1].passed);
        assert!(report.results[1].message.contains("must be relative"));
    }

    #[test]
    fn eval_reads_repo_files() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(temp.path().join("tests")).expect("mkdir");
        fs::write(temp.path().join("tests/test_a.py"), "def test(): pass\n").expect("write");
        fs::write(temp.path().join("tests/test_b.py"), "def test(): pass\n").expect("write");
        let report = verify(
            temp.path(),
            &[
                "eval:glob_count('tests/test_*.py') == 2",
                "eval:contains(read('tests/test_a.py'), 'def test')",
                "eval:is_dir('tests') and not is_file('tests')",
            ],
        );
        assert!(report.all_passed, "{:?}", report.results);
    }

    #[test]
    fn coverage_total_parsing() {
        let output = "Name    Stmts   Miss  Cover\n---\nfoo.py     10      2    80%\nTOTAL     100     20    80%\n";
        assert_eq!(parse_coverage_total(output), Some(80.0));
        let branch = "TOTAL     100     20     10      1    85.5%\n";
        assert_eq!(parse_coverage_total(branch), Some(85.5));
        assert_eq!(parse_coverage_total("no total here"), None);
    }

    #[test]
    fn coverage_criterion_runs_configured_command() {
        let temp = tempfile::tempdir().expect("tempdir");
        let verifier = Verifier::new(
            BaselineScanner::new(temp.path()),
            VerifyLimits {
                timeout: Duration::from_secs(10),
                coverage_command: "echo 'TOTAL 100 20 80%'".to_string(),
                ..VerifyLimits::default()
            },
        );
        let report = verifier.verify(
            &["coverage:75".to_string(), "coverage:90".to_string()],
            None,
            &[],
        );
        assert!(report.results[0].passed);
        assert_eq!(report.results[0].message, "Coverage 80% (required 75%)");
        assert!(!report.results[1].passed);
    }
}
