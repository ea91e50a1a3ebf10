//! Redirect callback state machine.
//!
//! ```text
//! Init -> ValidatingRedirect -> (SdkPath | FallbackPath) -> Linking -> Established
//!   \____________________ any state ____________________________/ -> Error
//! ```
//!
//! A watchdog is armed on entry to `Init`. If it expires while the SDK path is still
//! running, the SDK result is abandoned and the flow continues on the fallback path.
//! Once `Linking` starts the watchdog is dropped and linking is bounded by its own
//! timeout instead. Both terminal states clear the login-attempt marker.

use std::fmt;
use std::pin::pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::{select, AbortHandle, Abortable, Either};

use crate::auth::config::{CallbackConfig, ProviderConfig};
use crate::auth::error::{AuthError, AuthErrorKind, AuthResult};
use crate::auth::linker::IdentityLinker;
use crate::auth::model::{ExternalIdentity, LinkResult};
use crate::auth::oauth::redirect::RedirectParams;
use crate::auth::oauth::resolver::{IdentityResolver, Resolution};
use crate::auth::oauth::state::LoginStateStore;
use crate::auth::oauth::AuthorizationGrant;
use crate::auth::recovery::SessionRecoveryManager;
use crate::platform::runtime;

const LOG_TARGET: &str = "identity_link::callback";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallbackState {
    Init,
    ValidatingRedirect,
    SdkPath,
    FallbackPath,
    Linking,
    Established,
    Error,
}

impl CallbackState {
    pub fn as_str(self) -> &'static str {
        match self {
            CallbackState::Init => "INIT",
            CallbackState::ValidatingRedirect => "VALIDATING_REDIRECT",
            CallbackState::SdkPath => "SDK_PATH",
            CallbackState::FallbackPath => "FALLBACK_PATH",
            CallbackState::Linking => "LINKING",
            CallbackState::Established => "ESTABLISHED",
            CallbackState::Error => "ERROR",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, CallbackState::Established | CallbackState::Error)
    }
}

impl fmt::Display for CallbackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrailEntry {
    pub at: DateTime<Utc>,
    pub state: CallbackState,
    pub message: String,
}

/// Timestamped log of one callback run, meant for an expandable "details" view.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiagnosticTrail {
    entries: Vec<TrailEntry>,
}

impl DiagnosticTrail {
    pub fn entries(&self) -> &[TrailEntry] {
        &self.entries
    }

    /// States visited, in order, without repeats for consecutive notes.
    pub fn states(&self) -> Vec<CallbackState> {
        let mut states: Vec<CallbackState> = Vec::new();
        for entry in &self.entries {
            if states.last() != Some(&entry.state) {
                states.push(entry.state);
            }
        }
        states
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.entries.iter().any(|entry| entry.message.contains(needle))
    }

    fn record(&mut self, state: CallbackState, message: String) {
        self.entries.push(TrailEntry {
            at: Utc::now(),
            state,
            message,
        });
    }
}

impl fmt::Display for DiagnosticTrail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for entry in &self.entries {
            writeln!(
                f,
                "[{}] {:<19} {}",
                entry.at.format("%H:%M:%S%.3f"),
                entry.state.as_str(),
                entry.message
            )?;
        }
        Ok(())
    }
}

/// Terminal result of [`CallbackController::handle_redirect`].
#[derive(Debug)]
pub struct CallbackOutcome {
    /// Either [`CallbackState::Established`] or [`CallbackState::Error`].
    pub state: CallbackState,
    pub result: AuthResult<LinkResult>,
    pub trail: DiagnosticTrail,
    /// Page the login started from, if it was recorded.
    pub return_path: Option<String>,
}

impl CallbackOutcome {
    pub fn is_established(&self) -> bool {
        self.state == CallbackState::Established
    }

    pub fn error(&self) -> Option<&AuthError> {
        self.result.as_ref().err()
    }

    pub fn error_kind(&self) -> Option<AuthErrorKind> {
        self.error().map(AuthError::kind)
    }

    pub fn warnings(&self) -> &[AuthError] {
        match &self.result {
            Ok(link) => &link.warnings,
            Err(_) => &[],
        }
    }
}

struct Run {
    state: CallbackState,
    trail: DiagnosticTrail,
    return_path: Option<String>,
}

/// Shared between the abortable flow and the code that reports its outcome, so the
/// trail survives cancellation.
struct RunLog(Mutex<Run>);

impl RunLog {
    fn new() -> Self {
        Self(Mutex::new(Run {
            state: CallbackState::Init,
            trail: DiagnosticTrail::default(),
            return_path: None,
        }))
    }

    fn enter(&self, state: CallbackState, message: impl Into<String>) {
        let message = message.into();
        log::debug!(target: LOG_TARGET, "{state}: {message}");
        let mut run = self.0.lock().unwrap();
        run.state = state;
        run.trail.record(state, message);
    }

    fn note(&self, message: impl Into<String>) {
        let message = message.into();
        log::debug!(target: LOG_TARGET, "{message}");
        let mut run = self.0.lock().unwrap();
        let state = run.state;
        run.trail.record(state, message);
    }

    fn set_return_path(&self, path: Option<String>) {
        self.0.lock().unwrap().return_path = path;
    }

    fn into_inner(self) -> Run {
        match self.0.into_inner() {
            Ok(run) => run,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Deadline armed at `Init`. The timer starts when armed, so time spent validating the
/// redirect counts against the budget.
struct Watchdog {
    budget: Duration,
    timer: runtime::Timer,
}

impl Watchdog {
    fn arm(budget: Duration) -> Self {
        Self {
            budget,
            timer: runtime::start_timer(budget),
        }
    }
}

/// Drives one provider redirect to an established session or a terminal error.
pub struct CallbackController {
    provider: ProviderConfig,
    config: CallbackConfig,
    login_state: LoginStateStore,
    resolver: IdentityResolver,
    linker: Arc<IdentityLinker>,
    recovery: Option<Arc<SessionRecoveryManager>>,
    abort: Mutex<Option<AbortHandle>>,
}

impl CallbackController {
    pub fn new(
        provider: ProviderConfig,
        config: CallbackConfig,
        login_state: LoginStateStore,
        resolver: IdentityResolver,
        linker: Arc<IdentityLinker>,
    ) -> Self {
        Self {
            provider,
            config,
            login_state,
            resolver,
            linker,
            recovery: None,
            abort: Mutex::new(None),
        }
    }

    /// Lets token failures during linking trigger the recovery purge.
    pub fn with_recovery(mut self, recovery: Arc<SessionRecoveryManager>) -> Self {
        self.recovery = Some(recovery);
        self
    }

    /// Aborts the in-flight run, if any. The run resolves to [`AuthError::Cancelled`].
    pub fn cancel(&self) {
        if let Some(handle) = self.abort.lock().unwrap().take() {
            log::debug!(target: LOG_TARGET, "callback cancelled by caller");
            handle.abort();
        }
    }

    pub async fn handle_redirect(&self, redirect_url: &str) -> CallbackOutcome {
        let run = RunLog::new();
        let (handle, registration) = AbortHandle::new_pair();
        if let Some(previous) = self.abort.lock().unwrap().replace(handle) {
            previous.abort();
        }

        let result = Abortable::new(self.drive(redirect_url, &run), registration).await;
        self.abort.lock().unwrap().take();

        let result = result.unwrap_or(Err(AuthError::Cancelled));
        match &result {
            Ok(_) => {}
            Err(err) => {
                log::warn!(target: LOG_TARGET, "login callback failed: {err}");
                run.enter(CallbackState::Error, err.to_string());
            }
        }

        if let Err(err) = self.login_state.clear_login_attempt().await {
            run.note(format!("login marker not cleared: {err}"));
        }

        let run = run.into_inner();
        CallbackOutcome {
            state: run.state,
            result,
            trail: run.trail,
            return_path: run.return_path,
        }
    }

    async fn drive(&self, redirect_url: &str, run: &RunLog) -> AuthResult<LinkResult> {
        let mut watchdog = Watchdog::arm(self.config.watchdog());
        run.enter(
            CallbackState::Init,
            format!("watchdog armed for {} ms", self.config.watchdog_ms),
        );

        run.enter(CallbackState::ValidatingRedirect, "parsing redirect");
        let grant = self.validate(redirect_url, run).await?;

        let identity = self.resolve_identity(&grant, run, &mut watchdog).await?;
        drop(watchdog);

        run.enter(
            CallbackState::Linking,
            format!(
                "linking {}:{} ({})",
                identity.provider, identity.external_id, identity.trust
            ),
        );
        let linked = match runtime::timeout(
            self.config.link_timeout(),
            self.linker.link_external_identity(&identity),
        )
        .await
        {
            Ok(Ok(linked)) => linked,
            Ok(Err(err)) => {
                if let Some(recovery) = self.recovery.as_ref() {
                    if recovery.handle_error(&err).await.is_some() {
                        run.note("stale session detected; local auth state purged");
                    }
                }
                return Err(err);
            }
            Err(elapsed) => {
                return Err(AuthError::NetworkUnavailable(format!(
                    "account linking did not finish: {elapsed}"
                )))
            }
        };

        for warning in &linked.warnings {
            run.note(format!("warning: {warning}"));
        }
        run.enter(
            CallbackState::Established,
            format!(
                "session established for {} (new account: {})",
                linked.session.user_id(),
                linked.is_new_account
            ),
        );
        Ok(linked)
    }

    async fn validate(&self, redirect_url: &str, run: &RunLog) -> AuthResult<AuthorizationGrant> {
        let stored = self.login_state.take_csrf_state().await?;
        run.set_return_path(stored.origin_path);

        let params = RedirectParams::parse(redirect_url)?;
        let grant = params.validate(stored.token.as_deref(), &self.provider.redirect_uri)?;
        if stored.token.is_some() {
            run.note("state parameter matches stored CSRF token");
        } else {
            run.note("no stored CSRF token; state check skipped");
        }
        Ok(grant)
    }

    async fn resolve_identity(
        &self,
        grant: &AuthorizationGrant,
        run: &RunLog,
        watchdog: &mut Watchdog,
    ) -> AuthResult<ExternalIdentity> {
        let resolution = if self.resolver.loader().is_blocked() {
            self.resolver.degrade(AuthError::SdkLoadFailure(
                "SDK disabled for this session (ad blocker)".into(),
            ))
        } else {
            run.enter(CallbackState::SdkPath, "requesting user info from provider SDK");
            let budget = watchdog.budget;
            let sdk = pin!(self.resolver.resolve_via_sdk(grant));
            match select(sdk, watchdog.timer.as_mut()).await {
                Either::Left((resolution, _)) => resolution,
                Either::Right(((), _)) => {
                    log::warn!(
                        target: LOG_TARGET,
                        "watchdog fired after {} ms; abandoning SDK path",
                        budget.as_millis()
                    );
                    run.note("watchdog fired before identity was resolved");
                    self.resolver
                        .degrade(AuthError::IdentityRetrievalTimeout(budget))
                }
            }
        };

        match resolution {
            Resolution::Resolved(identity) => {
                run.note(format!("provider identity {} resolved", identity.external_id));
                Ok(identity)
            }
            Resolution::Fallback(reason) => {
                run.enter(CallbackState::FallbackPath, format!("using fallback identity: {reason}"));
                Ok(self.resolver.fallback_identity(grant))
            }
            Resolution::Fail(err) => Err(err),
        }
    }
}
