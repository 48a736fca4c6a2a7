//! [`TransactionFeed`] and [`Provisioner`] over the `accurev` command line.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use tributary_core::settings::{RootSettings, EXECUTABLE_NAME};
use tributary_core::types::{
    DepotName, ElementStatus, FeedEntry, StreamName, TransactionRef, TxId,
};

use crate::client::{History, PromoteOutput, Provisioned, Provisioner, TransactionFeed, WorkspaceKind};
use crate::command::{args, CommandOutput, Runner, QUERY_EXIT_CODES, STRICT_EXIT_CODES};
use crate::error::FeedError;
use crate::xml;

/// Depot-relative root of a workspace, as the backend spells it.
const WORKSPACE_ROOT: &str = "/./";

#[derive(Debug, Clone)]
pub struct AccuRevCli {
    runner: Runner,
    username: String,
    password: Option<String>,
}

impl AccuRevCli {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            runner: Runner::new(executable),
            username: String::new(),
            password: None,
        }
    }

    /// Client for the executable and credentials configured on a root.
    pub fn from_settings(settings: &RootSettings) -> Self {
        // Resolve through `$PATH` when the configured directory has no executable.
        let executable = settings.executable_path();
        let executable = if executable.is_file() {
            executable
        } else {
            PathBuf::from(EXECUTABLE_NAME)
        };
        Self {
            runner: Runner::new(executable),
            username: settings.username.clone(),
            password: settings.password.clone(),
        }
    }

    /// Create a non-expiring session for the configured user.
    pub fn login(&self) -> Result<(), FeedError> {
        let mut argv = args(["login", "-A", "-n"]);
        argv.push(self.username.clone());
        argv.push(self.password.clone().unwrap_or_default());

        let output = self.runner.run(&argv, None)?;
        if output.exit_code == 0 {
            info!(user = %self.username, "logged in");
            return Ok(());
        }
        Err(FeedError::AuthenticationFailed {
            command: format!("accurev login -A -n {}", self.username),
            detail: format!(
                "exit code {}\nstdout: {}\nstderr: {}",
                output.exit_code,
                output.stdout_text().trim(),
                output.stderr.trim()
            ),
        })
    }

    fn query(&self, argv: Vec<String>) -> Result<CommandOutput, FeedError> {
        self.runner.checked(&argv, None, QUERY_EXIT_CODES)
    }

    fn exec(&self, argv: Vec<String>, cwd: Option<&Path>) -> Result<CommandOutput, FeedError> {
        self.runner.checked(&argv, cwd, STRICT_EXIT_CODES)
    }

    fn promote(&self, argv: Vec<String>) -> Result<PromoteOutput, FeedError> {
        let output = self.runner.run(&argv, None)?;
        Ok(PromoteOutput {
            exit_code: output.exit_code,
            stdout: output.stdout_text(),
            stderr: output.stderr,
            command: output.command,
        })
    }

    fn stream_exists(&self, depot: &DepotName, stream: &StreamName) -> Result<bool, FeedError> {
        let out = self.query(show_streams(depot, stream))?;
        xml::parse_stream_exists(&out.stdout_text())
    }

    fn tree_names(&self, depot: &DepotName, kind: WorkspaceKind) -> Result<Vec<String>, FeedError> {
        let what = match kind {
            WorkspaceKind::Workspace => "wspaces",
            WorkspaceKind::ReferenceTree => "refs",
        };
        let mut argv = args(["show", "-fx", "-p"]);
        argv.push(depot.to_string());
        argv.push(what.to_string());
        let out = self.query(argv)?;
        xml::parse_workspace_names(&out.stdout_text())
    }
}

fn show_streams(depot: &DepotName, stream: &StreamName) -> Vec<String> {
    vec![
        "show".into(),
        "-fx".into(),
        "-p".into(),
        depot.to_string(),
        "-s".into(),
        stream.to_string(),
        "streams".into(),
    ]
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

// ---------------------------------------------------------------------------
// TransactionFeed
// ---------------------------------------------------------------------------

impl TransactionFeed for AccuRevCli {
    fn history(
        &self,
        depot: &DepotName,
        stream: &StreamName,
        from: TxId,
        to: TxId,
    ) -> Result<History, FeedError> {
        let argv = vec![
            "hist".into(),
            "-fvx".into(),
            "-t".into(),
            format!("{to}-{from}"),
            "-k".into(),
            "promote".into(),
            "-p".into(),
            depot.to_string(),
            "-s".into(),
            stream.to_string(),
        ];
        let out = self.query(argv)?;
        xml::parse_history(&out.stdout_text())
    }

    fn direct_ancestor(
        &self,
        version: &str,
        element_path: &str,
    ) -> Result<Option<String>, FeedError> {
        let argv = vec![
            "anc".into(),
            "-fx".into(),
            "-v".into(),
            version.to_string(),
            element_path.to_string(),
        ];
        let out = self.query(argv)?;
        xml::parse_ancestor(&out.stdout_text())
    }

    fn parent_stream(
        &self,
        depot: &DepotName,
        stream: &StreamName,
    ) -> Result<Option<StreamName>, FeedError> {
        let out = self.query(show_streams(depot, stream))?;
        xml::parse_parent_stream(&out.stdout_text())
    }

    fn change_feed(
        &self,
        stream: &StreamName,
        from: TxId,
        to: TxId,
    ) -> Result<Vec<FeedEntry>, FeedError> {
        debug!(%stream, %from, %to, "requesting change feed");
        let argv = vec![
            "update".into(),
            "-fx".into(),
            "-t".into(),
            to.to_string(),
            "-s".into(),
            stream.to_string(),
            "-i".into(),
        ];
        let out = self.query(argv)?;
        xml::parse_change_feed(&out.stdout_text())
    }

    fn element_content(
        &self,
        depot: &DepotName,
        version: &str,
        element_path: &str,
    ) -> Result<Vec<u8>, FeedError> {
        let argv = vec![
            "cat".into(),
            "-v".into(),
            version.to_string(),
            "-p".into(),
            depot.to_string(),
            element_path.to_string(),
        ];
        Ok(self.query(argv)?.stdout)
    }

    fn element_status(
        &self,
        stream: &StreamName,
        element_path: &str,
    ) -> Result<Option<ElementStatus>, FeedError> {
        let argv = vec![
            "stat".into(),
            "-fx".into(),
            "-s".into(),
            stream.to_string(),
            element_path.to_string(),
        ];
        let out = self.query(argv)?;
        xml::parse_element_status(&out.stdout_text())
    }

    fn pending_transactions(&self, stream: &StreamName) -> Result<Vec<TransactionRef>, FeedError> {
        let argv = vec![
            "translist".into(),
            "-fx".into(),
            "-s".into(),
            stream.to_string(),
        ];
        let out = self.runner.checked(&argv, None, STRICT_EXIT_CODES)?;
        xml::parse_pending(&out.stdout_text())
    }

    fn promote_batch(
        &self,
        stream: &StreamName,
        comment_file: &Path,
        id_list_file: &Path,
    ) -> Result<PromoteOutput, FeedError> {
        self.promote(vec![
            "promote".into(),
            "-Fx".into(),
            "-Z".into(),
            format!("-c@{}", comment_file.display()),
            "-s".into(),
            stream.to_string(),
            "-l".into(),
            path_arg(id_list_file),
        ])
    }

    fn promote_one(
        &self,
        stream: &StreamName,
        comment_file: &Path,
        id: TxId,
    ) -> Result<PromoteOutput, FeedError> {
        self.promote(vec![
            "promote".into(),
            format!("-c@{}", comment_file.display()),
            "-s".into(),
            stream.to_string(),
            "-t".into(),
            id.to_string(),
        ])
    }

    fn materialize(
        &self,
        depot: &DepotName,
        stream: &StreamName,
        at: TxId,
        dest: &Path,
    ) -> Result<(), FeedError> {
        info!(%depot, %stream, %at, dest = %dest.display(), "populating stream");
        let argv = vec![
            "pop".into(),
            "-fx".into(),
            "-R".into(),
            "-O".into(),
            "-v".into(),
            stream.to_string(),
            "-t".into(),
            at.to_string(),
            "-L".into(),
            path_arg(dest),
            WORKSPACE_ROOT.into(),
        ];
        self.exec(argv, None).map(|_| ())
    }

    fn last_transaction(&self, depot: &DepotName) -> Result<TxId, FeedError> {
        let argv = vec![
            "hist".into(),
            "-fx".into(),
            "-t".into(),
            "now.1".into(),
            "-p".into(),
            depot.to_string(),
        ];
        let out = self.query(argv)?;
        xml::parse_last_transaction(&out.stdout_text())
    }

    fn create_snapshot(&self, name: &str, basis: &StreamName, at: TxId) -> Result<(), FeedError> {
        let argv = vec![
            "mksnap".into(),
            "-s".into(),
            name.to_string(),
            "-b".into(),
            basis.to_string(),
            "-t".into(),
            at.to_string(),
        ];
        self.query(argv).map(|_| ())
    }
}

// ---------------------------------------------------------------------------
// Provisioner
// ---------------------------------------------------------------------------

impl Provisioner for AccuRevCli {
    fn ensure_stream(
        &self,
        depot: &DepotName,
        name: &StreamName,
        basis: &StreamName,
        at: TxId,
    ) -> Result<Provisioned, FeedError> {
        let (verb, outcome) = if self.stream_exists(depot, name)? {
            ("chstream", Provisioned::Changed)
        } else {
            ("mkstream", Provisioned::Created)
        };
        info!(%name, %basis, %at, verb, "time-locking stream");
        let argv = vec![
            verb.into(),
            "-s".into(),
            name.to_string(),
            "-b".into(),
            basis.to_string(),
            "-t".into(),
            at.to_string(),
        ];
        self.exec(argv, None)?;
        Ok(outcome)
    }

    fn ensure_workspace(
        &self,
        depot: &DepotName,
        kind: WorkspaceKind,
        name: &str,
        basis: &StreamName,
        path: &Path,
    ) -> Result<Provisioned, FeedError> {
        let exists = self
            .tree_names(depot, kind)?
            .iter()
            .any(|existing| existing.eq_ignore_ascii_case(name));
        let (verb, flag, outcome) = match (kind, exists) {
            (WorkspaceKind::Workspace, true) => ("chws", "-w", Provisioned::Changed),
            (WorkspaceKind::Workspace, false) => ("mkws", "-w", Provisioned::Created),
            (WorkspaceKind::ReferenceTree, true) => ("chref", "-r", Provisioned::Changed),
            (WorkspaceKind::ReferenceTree, false) => ("mkref", "-r", Provisioned::Created),
        };
        info!(%kind, workspace = name, %basis, path = %path.display(), verb, "preparing checkout tree");
        let argv = vec![
            verb.into(),
            flag.into(),
            name.to_string(),
            "-b".into(),
            basis.to_string(),
            "-l".into(),
            path_arg(path),
        ];
        self.exec(argv, None)?;
        Ok(outcome)
    }

    fn sync_workspace(&self, path: &Path, clean: bool) -> Result<(), FeedError> {
        let (update, populate) = if clean {
            (args(["update", "-9"]), args(["pop", "-R", "-O", WORKSPACE_ROOT]))
        } else {
            (args(["update"]), args(["pop", "-R", WORKSPACE_ROOT]))
        };
        info!(path = %path.display(), clean, "updating workspace");
        self.exec(update, Some(path))?;
        self.exec(populate, Some(path))?;
        // Records timestamps so later updates can skip unchanged files.
        self.exec(args(["stat", "-n"]), Some(path))?;
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    /// A stand-in executable that echoes its arguments to a log and prints
    /// a canned response.
    fn fake_backend(dir: &TempDir, response: &str, exit_code: i32) -> AccuRevCli {
        let script = dir.path().join("accurev");
        let log = dir.path().join("calls.log");
        let body = format!(
            "#!/bin/sh\necho \"$@\" >> '{}'\ncat <<'XML'\n{}\nXML\nexit {}\n",
            log.display(),
            response,
            exit_code
        );
        std::fs::write(&script, body).unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        AccuRevCli::new(script)
    }

    fn calls(dir: &TempDir) -> String {
        std::fs::read_to_string(dir.path().join("calls.log")).unwrap_or_default()
    }

    #[test]
    fn history_builds_range_arguments() {
        let dir = TempDir::new().unwrap();
        let cli = fake_backend(&dir, "<AcResponse/>", 0);
        let history = cli
            .history(&"acme".into(), &"acme_dev".into(), TxId(99), TxId(101))
            .expect("history");
        assert!(history.transactions.is_empty());
        assert_eq!(
            calls(&dir).trim(),
            "hist -fvx -t 101-99 -k promote -p acme -s acme_dev"
        );
    }

    #[test]
    fn exit_code_one_is_tolerated_for_queries() {
        let dir = TempDir::new().unwrap();
        let cli = fake_backend(&dir, r#"<AcResponse><transaction id="7" time="1"/></AcResponse>"#, 1);
        assert_eq!(cli.last_transaction(&"acme".into()).unwrap(), TxId(7));
    }

    #[test]
    fn promote_reports_exit_code() {
        let dir = TempDir::new().unwrap();
        let cli = fake_backend(&dir, "promoted", 3);
        let out = cli
            .promote_one(&"acme_dev".into(), Path::new("/tmp/c.txt"), TxId(5))
            .expect("spawned");
        assert!(!out.succeeded());
        assert_eq!(calls(&dir).trim(), "promote -c@/tmp/c.txt -s acme_dev -t 5");
    }

    #[test]
    fn ensure_stream_changes_existing_stream() {
        let dir = TempDir::new().unwrap();
        let cli = fake_backend(&dir, r#"<streams><stream name="h_w_timelock"/></streams>"#, 0);
        let outcome = cli
            .ensure_stream(&"acme".into(), &"h_w_timelock".into(), &"acme_dev".into(), TxId(42))
            .expect("ensure");
        assert_eq!(outcome, Provisioned::Changed);
        assert!(calls(&dir).contains("chstream -s h_w_timelock -b acme_dev -t 42"));
    }

    #[test]
    fn failed_login_is_authentication_error() {
        let dir = TempDir::new().unwrap();
        let cli = fake_backend(&dir, "Failed authentication", 1);
        assert!(cli.login().unwrap_err().is_authentication());
    }
}
