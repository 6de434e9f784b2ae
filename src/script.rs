//! Scripts executed on nodes and the options that shape their execution.

use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use crate::domain::LoginCredentials;

/// A shell script to run on a node.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Script {
    /// Shell source.
    pub body: String,
    /// Set when the script provisions a new administrative login. Runners of
    /// such scripts report the negotiated credentials, which are persisted
    /// after the run.
    #[serde(default)]
    pub grants_admin_access: bool,
}

impl Script {
    /// Creates a script from shell source.
    #[must_use]
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            grants_admin_access: false,
        }
    }

    /// Marks the script as provisioning administrative access.
    #[must_use]
    pub const fn granting_admin_access(mut self) -> Self {
        self.grants_admin_access = true;
        self
    }

    /// Renders the command line to execute for `user`.
    ///
    /// With `run_as_root` the body is wrapped in a non-interactive `sudo`
    /// unless the login user already is `root`.
    #[must_use]
    pub fn render(&self, user: &str, run_as_root: bool) -> String {
        if !run_as_root || user == "root" {
            return self.body.clone();
        }
        let escaped = shell_escape::unix::escape(Cow::Borrowed(self.body.as_str()));
        format!("sudo -n sh -c {escaped}")
    }
}

/// Result of executing a script.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct ExecResponse {
    /// Captured standard output.
    pub output: String,
    /// Captured standard error.
    pub error: String,
    /// Exit status reported by the remote shell.
    pub exit_status: i32,
}

impl ExecResponse {
    /// Creates a response with empty output.
    #[must_use]
    pub const fn with_exit_status(exit_status: i32) -> Self {
        Self {
            output: String::new(),
            error: String::new(),
            exit_status,
        }
    }

    /// Returns `true` when the script exited with status zero.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.exit_status == 0
    }
}

/// Per-call overrides for script execution.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RunScriptOptions {
    /// Name used in logs and task keys.
    pub name: Option<String>,
    /// Login user replacing the node's stored user.
    pub login_user: Option<String>,
    /// Password replacing the node's stored password.
    pub login_password: Option<String>,
    /// Private key replacing the node's stored key.
    pub login_private_key: Option<String>,
    /// Whether `sudo` requires the password.
    pub authenticate_sudo: Option<bool>,
    /// Wrap the script in `sudo`.
    pub run_as_root: bool,
}

impl RunScriptOptions {
    /// Creates options with no overrides that run as root.
    #[must_use]
    pub fn new() -> Self {
        Self {
            run_as_root: true,
            ..Self::default()
        }
    }

    /// Sets the display name.
    #[must_use]
    pub fn name_task(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Overrides the login user.
    #[must_use]
    pub fn override_login_user(mut self, user: impl Into<String>) -> Self {
        self.login_user = Some(user.into());
        self
    }

    /// Overrides the login password.
    #[must_use]
    pub fn override_login_password(mut self, password: impl Into<String>) -> Self {
        self.login_password = Some(password.into());
        self
    }

    /// Overrides the login private key.
    #[must_use]
    pub fn override_login_private_key(mut self, key: impl Into<String>) -> Self {
        self.login_private_key = Some(key.into());
        self
    }

    /// Overrides whether `sudo` requires the password.
    #[must_use]
    pub const fn override_authenticate_sudo(mut self, value: bool) -> Self {
        self.authenticate_sudo = Some(value);
        self
    }

    /// Controls the `sudo` wrapper.
    #[must_use]
    pub const fn run_as_root(mut self, value: bool) -> Self {
        self.run_as_root = value;
        self
    }

    /// Returns `true` when any credential field is overridden.
    #[must_use]
    pub const fn has_credential_overrides(&self) -> bool {
        self.login_user.is_some()
            || self.login_password.is_some()
            || self.login_private_key.is_some()
            || self.authenticate_sudo.is_some()
    }

    /// Applies the overrides on top of `base`.
    ///
    /// Returns `None` only when there is no base and no login user override.
    #[must_use]
    pub fn apply_to(&self, base: Option<LoginCredentials>) -> Option<LoginCredentials> {
        if !self.has_credential_overrides() {
            return base;
        }
        let mut credentials = match (base, &self.login_user) {
            (Some(existing), _) => existing,
            (None, Some(user)) => LoginCredentials::for_user(user.clone()),
            (None, None) => return None,
        };
        if let Some(user) = &self.login_user {
            credentials.user.clone_from(user);
        }
        if let Some(password) = &self.login_password {
            credentials.password = Some(password.clone());
        }
        if let Some(key) = &self.login_private_key {
            credentials.private_key = Some(key.clone());
        }
        if let Some(flag) = self.authenticate_sudo {
            credentials.authenticate_sudo = flag;
        }
        Some(credentials)
    }
}
