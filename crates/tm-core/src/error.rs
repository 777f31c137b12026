use std::fmt;

use thiserror::Error;

// ---------------------------------------------------------------------------
// ReturnCode
// ---------------------------------------------------------------------------

/// Symbolic exit status of `pbench-tool-meister-start`.
///
/// The numeric values are part of the command's interface; callers in the
/// agent scripts compare against them, so they never change. Value 2 was
/// retired and stays unused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ReturnCode {
    Success = 0,
    BadToolGroup = 1,
    MissingBenchRunDir = 3,
    MissingInstallDir = 4,
    ExcInstallDir = 5,
    BadToolMetadata = 6,
    MissingReqEnvs = 7,
    ExcCreateTmDir = 8,
    MissingHostnameEnvs = 9,
    NoIp = 10,
    ExcRedisConfig = 11,
    ExcSpawnRedis = 12,
    RedisFailed = 13,
    RedisChanFailed = 14,
    RedisTmKeyFailed = 15,
    RedisTdsKeyFailed = 16,
    TdsForkFailed = 17,
    TdsLogPubFailed = 18,
    TmFailures = 19,
    ExcBenchRunDir = 20,
    TdsWaitFailure = 21,
    ExcSysinfoDir = 22,
    ExcToolGroupDir = 23,
    SysinfoFailed = 24,
    InitFailed = 25,
    TdsStartupTimeout = 26,
    ToolGroupExc = 27,
    BadRedisArg = 28,
    BadRedisPort = 29,
    TmMissing = 30,
    BadWsgiPort = 31,
    BadSysinfo = 32,
    MissingParams = 33,
    MissingSshCmd = 34,
    BadWsgiHost = 35,
    BadRedisHost = 36,
    BadFullHostname = 37,
    BadHostname = 38,
    InvalidOrchestrate = 39,
    RemoteNotReachable = 40,
    KeyboardInterrupt = 41,
    InvalidTmData = 42,
    ToolInstallFailures = 43,
    ExcCreateUuid = 44,
}

impl ReturnCode {
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn is_success(self) -> bool {
        self == ReturnCode::Success
    }

    pub fn name(self) -> &'static str {
        match self {
            ReturnCode::Success => "SUCCESS",
            ReturnCode::BadToolGroup => "BADTOOLGROUP",
            ReturnCode::MissingBenchRunDir => "MISSINGBENCHRUNDIR",
            ReturnCode::MissingInstallDir => "MISSINGINSTALLDIR",
            ReturnCode::ExcInstallDir => "EXCINSTALLDIR",
            ReturnCode::BadToolMetadata => "BADTOOLMETADATA",
            ReturnCode::MissingReqEnvs => "MISSINGREQENVS",
            ReturnCode::ExcCreateTmDir => "EXCCREATETMDIR",
            ReturnCode::MissingHostnameEnvs => "MISSINGHOSTNAMEENVS",
            ReturnCode::NoIp => "NOIP",
            ReturnCode::ExcRedisConfig => "EXCREDISCONFIG",
            ReturnCode::ExcSpawnRedis => "EXCSPAWNREDIS",
            ReturnCode::RedisFailed => "REDISFAILED",
            ReturnCode::RedisChanFailed => "REDISCHANFAILED",
            ReturnCode::RedisTmKeyFailed => "REDISTMKEYFAILED",
            ReturnCode::RedisTdsKeyFailed => "REDISTDSKEYFAILED",
            ReturnCode::TdsForkFailed => "TDSFORKFAILED",
            ReturnCode::TdsLogPubFailed => "TDSLOGPUBFAILED",
            ReturnCode::TmFailures => "TMFAILURES",
            ReturnCode::ExcBenchRunDir => "EXCBENCHRUNDIR",
            ReturnCode::TdsWaitFailure => "TDSWAITFAILURE",
            ReturnCode::ExcSysinfoDir => "EXCSYSINFODIR",
            ReturnCode::ExcToolGroupDir => "EXCTOOLGROUPDIR",
            ReturnCode::SysinfoFailed => "SYSINFOFAILED",
            ReturnCode::InitFailed => "INITFAILED",
            ReturnCode::TdsStartupTimeout => "TDSSTARTUPTIMEOUT",
            ReturnCode::ToolGroupExc => "TOOLGROUPEXC",
            ReturnCode::BadRedisArg => "BADREDISARG",
            ReturnCode::BadRedisPort => "BADREDISPORT",
            ReturnCode::TmMissing => "TMMISSING",
            ReturnCode::BadWsgiPort => "BADWSGIPORT",
            ReturnCode::BadSysinfo => "BADSYSINFO",
            ReturnCode::MissingParams => "MISSINGPARAMS",
            ReturnCode::MissingSshCmd => "MISSINGSSHCMD",
            ReturnCode::BadWsgiHost => "BADWSGIHOST",
            ReturnCode::BadRedisHost => "BADREDISHOST",
            ReturnCode::BadFullHostname => "BADFULLHOSTNAME",
            ReturnCode::BadHostname => "BADHOSTNAME",
            ReturnCode::InvalidOrchestrate => "INVALIDORCHESTRATE",
            ReturnCode::RemoteNotReachable => "REMOTENOTREACHABLE",
            ReturnCode::KeyboardInterrupt => "KEYBOARDINTERRUPT",
            ReturnCode::InvalidTmData => "INVALIDTMDATA",
            ReturnCode::ToolInstallFailures => "TOOLINSTALLFAILURES",
            ReturnCode::ExcCreateUuid => "EXCCREATEUUID",
        }
    }
}

impl fmt::Display for ReturnCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.code())
    }
}

// ---------------------------------------------------------------------------
// StartError
// ---------------------------------------------------------------------------

pub type Cause = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The one failure type every orchestration step returns.
///
/// Carries the exit code the command will report, a message for the
/// operator and, when there is one, the lower-level error that caused it.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct StartError {
    pub code: ReturnCode,
    pub message: String,
    #[source]
    pub cause: Option<Cause>,
}

impl StartError {
    pub fn new(code: ReturnCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            cause: None,
        }
    }

    pub fn with_cause(mut self, cause: impl Into<Cause>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    pub fn interrupted() -> Self {
        Self::new(ReturnCode::KeyboardInterrupt, "Interrupted by user")
    }
}

pub type Result<T> = std::result::Result<T, StartError>;

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// What the orchestrator hands back to its caller.
#[derive(Debug)]
pub struct Outcome {
    pub code: ReturnCode,
    pub message: String,
    pub cause: Option<Cause>,
}

impl Outcome {
    pub fn success() -> Self {
        Self {
            code: ReturnCode::Success,
            message: "success".to_string(),
            cause: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.code.is_success()
    }
}

impl From<StartError> for Outcome {
    fn from(e: StartError) -> Self {
        Self {
            code: e.code,
            message: e.message,
            cause: e.cause,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(ReturnCode::Success.code(), 0);
        assert_eq!(ReturnCode::BadToolGroup.code(), 1);
        assert_eq!(ReturnCode::TmFailures.code(), 19);
        assert_eq!(ReturnCode::TdsStartupTimeout.code(), 26);
        assert_eq!(ReturnCode::KeyboardInterrupt.code(), 41);
        assert_eq!(ReturnCode::ExcCreateUuid.code(), 44);
    }

    #[test]
    fn start_error_keeps_cause() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err = StartError::new(ReturnCode::NoIp, "no address").with_cause(io);
        assert_eq!(err.to_string(), "no address");
        let source = std::error::Error::source(&err).unwrap();
        assert_eq!(source.to_string(), "gone");

        let outcome = Outcome::from(err);
        assert_eq!(outcome.code, ReturnCode::NoIp);
        assert!(outcome.cause.is_some());
    }

    #[test]
    fn display_names_code() {
        assert_eq!(ReturnCode::TmMissing.to_string(), "TMMISSING (30)");
    }
}
