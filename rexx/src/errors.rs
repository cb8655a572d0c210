use std::fmt;

use crate::condition::ConditionReport;

/// REXX error number, `major.minor`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ErrorCode {
    pub major: u16,
    pub minor: u16,
}

impl ErrorCode {
    pub const fn new(major: u16, minor: u16) -> Self {
        Self { major, minor }
    }

    pub const HALT: ErrorCode = ErrorCode::new(4, 1);
    pub const CONTROL_STACK_FULL: ErrorCode = ErrorCode::new(11, 1);
    pub const LABEL_NOT_FOUND: ErrorCode = ErrorCode::new(16, 1);
    pub const UNEXPECTED_PROCEDURE: ErrorCode = ErrorCode::new(17, 1);
    pub const UNEXPECTED_EXPOSE: ErrorCode = ErrorCode::new(17, 2);
    pub const INVALID_TRACE: ErrorCode = ErrorCode::new(24, 1);
    pub const WHOLE_NUMBER: ErrorCode = ErrorCode::new(26, 1);
    pub const INTEGER_DIVISION_OVERFLOW: ErrorCode = ErrorCode::new(26, 11);
    pub const INVALID_DIGITS: ErrorCode = ErrorCode::new(33, 1);
    pub const DIGITS_TOO_LARGE: ErrorCode = ErrorCode::new(33, 2);
    pub const INVALID_FUZZ: ErrorCode = ErrorCode::new(33, 3);
    pub const LOGICAL_IF: ErrorCode = ErrorCode::new(34, 1);
    pub const LOGICAL_VALUE: ErrorCode = ErrorCode::new(34, 6);
    pub const NOT_ENOUGH_ARGUMENTS: ErrorCode = ErrorCode::new(40, 3);
    pub const TOO_MANY_ARGUMENTS: ErrorCode = ErrorCode::new(40, 4);
    pub const INVALID_OPTION: ErrorCode = ErrorCode::new(40, 904);
    pub const NONNUMERIC: ErrorCode = ErrorCode::new(41, 1);
    pub const ARITHMETIC_OVERFLOW: ErrorCode = ErrorCode::new(42, 1);
    pub const ARITHMETIC_UNDERFLOW: ErrorCode = ErrorCode::new(42, 2);
    pub const DIVIDE_BY_ZERO: ErrorCode = ErrorCode::new(42, 3);
    pub const ROUTINE_NOT_FOUND: ErrorCode = ErrorCode::new(43, 1);
    pub const NO_DATA_RETURNED: ErrorCode = ErrorCode::new(44, 1);
    pub const NATIVE_WHOLE_NUMBER: ErrorCode = ErrorCode::new(88, 902);
    pub const NATIVE_RANGE: ErrorCode = ErrorCode::new(88, 903);
    pub const NATIVE_NON_NEGATIVE: ErrorCode = ErrorCode::new(88, 904);
    pub const NATIVE_NUMBER: ErrorCode = ErrorCode::new(88, 905);
    pub const NATIVE_POINTER: ErrorCode = ErrorCode::new(88, 906);
    pub const NATIVE_NULL_CHARACTER: ErrorCode = ErrorCode::new(88, 907);
    pub const INCORRECT_ARGUMENT: ErrorCode = ErrorCode::new(93, 900);
    pub const TOO_MANY_METHOD_ARGUMENTS: ErrorCode = ErrorCode::new(93, 902);
    pub const MISSING_METHOD_ARGUMENT: ErrorCode = ErrorCode::new(93, 903);
    pub const NO_METHOD: ErrorCode = ErrorCode::new(97, 1);
    pub const UNRESOLVED_NATIVE: ErrorCode = ErrorCode::new(98, 900);
    pub const NOT_SINGLE_DIMENSION: ErrorCode = ErrorCode::new(98, 913);
    pub const AUTHORIZATION: ErrorCode = ErrorCode::new(98, 948);
    pub const TRANSLATION: ErrorCode = ErrorCode::new(99, 1);

    /// Parses `"99.1"` or `"40"`.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        let (major, minor) = match text.split_once('.') {
            Some((major, minor)) => (major, minor),
            None => (text, "0"),
        };
        Some(Self::new(major.parse().ok()?, minor.parse().ok()?))
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.minor == 0 {
            write!(f, "{}", self.major)
        } else {
            write!(f, "{}.{}", self.major, self.minor)
        }
    }
}

/// Source of error message texts.
///
/// `message` texts may contain `&1`..`&9` markers that are replaced with
/// the condition's substitution values.
pub trait MessageCatalog: Send + Sync {
    fn error_text(&self, major: u16) -> Option<&str>;
    fn message(&self, code: ErrorCode) -> Option<&str>;

    fn format(&self, code: ErrorCode, substitutions: &[String]) -> String {
        match self.message(code) {
            Some(template) => substitute(template, substitutions),
            None => self.error_text(code.major).unwrap_or_default().to_string(),
        }
    }
}

pub fn substitute(template: &str, substitutions: &[String]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '&' {
            if let Some(d) = chars.peek().and_then(|d| d.to_digit(10)) {
                chars.next();
                if d > 0 {
                    if let Some(s) = substitutions.get(d as usize - 1) {
                        out.push_str(s);
                    }
                }
                continue;
            }
        }
        out.push(c);
    }
    out
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultCatalog;

impl MessageCatalog for DefaultCatalog {
    fn error_text(&self, major: u16) -> Option<&str> {
        Some(match major {
            4 => "Program interrupted",
            11 => "Control stack full",
            16 => "Label not found",
            17 => "Unexpected PROCEDURE",
            24 => "Invalid TRACE request",
            26 => "Invalid whole number",
            33 => "Invalid expression result",
            34 => "Logical value not 0 or 1",
            40 => "Incorrect call to routine",
            41 => "Bad arithmetic conversion",
            42 => "Arithmetic overflow/underflow",
            43 => "Routine not found",
            44 => "Function or message did not return data",
            88 => "Invalid argument",
            93 => "Incorrect call to method",
            97 => "Object method not found",
            98 => "Execution error",
            99 => "Translation error",
            _ => return None,
        })
    }

    fn message(&self, code: ErrorCode) -> Option<&str> {
        Some(match (code.major, code.minor) {
            (4, 1) => "Program interrupted with HALT condition: &1",
            (11, 1) => "Control stack full; nesting limit of &1 exceeded",
            (16, 1) => "Label \"&1\" not found",
            (17, 1) => {
                "PROCEDURE is valid only when it is the first instruction executed after an internal CALL or function invocation"
            }
            (17, 2) => "EXPOSE is valid only as the first instruction of a method",
            (24, 1) => "TRACE request letter must be one of \"ACEFILNOR\"; found \"&1\"",
            (26, 1) => "Whole number expected; found \"&1\"",
            (26, 11) => "Integer division result exceeds the current DIGITS setting of &1",
            (33, 1) => "DIGITS value must be a positive whole number; found \"&1\"",
            (33, 2) => "DIGITS value must not exceed &2; found \"&1\"",
            (33, 3) => "FUZZ value must be less than DIGITS (&2); found \"&1\"",
            (34, 1) => {
                "Value of expression following IF keyword must be exactly \"0\" or \"1\"; found \"&1\""
            }
            (34, 6) => "Logical value must be exactly \"0\" or \"1\"; found \"&1\"",
            (40, 3) => "Not enough arguments in invocation of &1; minimum expected is &2",
            (40, 4) => "Too many arguments in invocation of &1; maximum expected is &2",
            (40, 904) => "&1 argument &2 must be one of &3; found \"&4\"",
            (41, 1) => "Nonnumeric value (\"&1\") used in arithmetic operation",
            (42, 1) => "Arithmetic overflow; exponent of result exceeds &1",
            (42, 2) => "Arithmetic underflow; exponent of result is below -&1",
            (42, 3) => "Arithmetic overflow; divisor must not be zero",
            (43, 1) => "Could not find routine \"&1\"",
            (44, 1) => "No data returned from function \"&1\"",
            (88, 902) => "Argument &1 must be a whole number; found \"&2\"",
            (88, 903) => "Argument &1 must be in the range &2 to &3; found \"&4\"",
            (88, 904) => "Argument &1 must be zero or a positive whole number; found \"&2\"",
            (88, 905) => "Argument &1 must be a number; found \"&2\"",
            (88, 906) => "Argument &1 must be a pointer; found \"&2\"",
            (88, 907) => "Argument &1 must not contain a null character",
            (93, 900) => "&1",
            (93, 902) => "Too many arguments in invocation of &1; &2 expected",
            (93, 903) => "Missing argument in invocation of &1; argument &2 is required",
            (97, 1) => "Object \"&1\" does not understand message \"&2\"",
            (98, 900) => "Could not resolve external routine \"&2\" in library \"&1\"",
            (98, 913) => "Unable to convert object \"&1\" to a single-dimensional array value",
            (98, 948) => "Authorization failure: &1",
            (99, 1) => "Translation error in \"&1\": &2",
            _ => return None,
        })
    }
}

// ── Errors surfaced to the embedding program ──────────────────────────

/// Interpreter failures that are not conditions: no trap is consulted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FatalError {
    NoConditionToPropagate { program: String, line: usize },
    ControlStackFull { depth: usize },
    ProgramNotFound(String),
    /// A SIGNAL or EXIT whose target activation was no longer on the stack.
    LostTransfer,
}

impl fmt::Display for FatalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FatalError::NoConditionToPropagate { program, line } => write!(
                f,
                "RAISE PROPAGATE with no active condition in {program} line {line}"
            ),
            FatalError::ControlStackFull { depth } => {
                write!(f, "control stack full ({depth} activations)")
            }
            FatalError::ProgramNotFound(name) => write!(f, "program {name} is not registered"),
            FatalError::LostTransfer => write!(f, "control transfer escaped its activation"),
        }
    }
}

impl std::error::Error for FatalError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageError {
    /// The saved root is not a globals array of the expected shape.
    MalformedRoots,
    /// An image references a slot outside the image.
    DanglingReference(u32),
}

impl fmt::Display for ImageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageError::MalformedRoots => write!(f, "image roots are malformed"),
            ImageError::DanglingReference(raw) => {
                write!(f, "image references missing object #{raw}")
            }
        }
    }
}

impl std::error::Error for ImageError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KernelError {
    DuplicatePackage(String),
    Image(ImageError),
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelError::DuplicatePackage(name) => {
                write!(f, "a package named {name} is already registered")
            }
            KernelError::Image(err) => write!(f, "image restore failed: {err}"),
        }
    }
}

impl std::error::Error for KernelError {}

impl From<ImageError> for KernelError {
    fn from(err: ImageError) -> Self {
        KernelError::Image(err)
    }
}

/// What a caller of a program or routine receives on failure.
#[derive(Debug, Clone)]
pub enum RexxError {
    /// An untrapped SYNTAX or HALT condition reached the top.
    Condition(ConditionReport),
    Fatal(FatalError),
    Kernel(KernelError),
}

impl RexxError {
    pub fn report(&self) -> Option<&ConditionReport> {
        match self {
            RexxError::Condition(report) => Some(report),
            RexxError::Fatal(_) | RexxError::Kernel(_) => None,
        }
    }
}

impl fmt::Display for RexxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RexxError::Condition(report) => write!(f, "{report}"),
            RexxError::Fatal(err) => write!(f, "fatal: {err}"),
            RexxError::Kernel(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for RexxError {}

impl From<KernelError> for RexxError {
    fn from(err: KernelError) -> Self {
        RexxError::Kernel(err)
    }
}

impl From<FatalError> for RexxError {
    fn from(err: FatalError) -> Self {
        RexxError::Fatal(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_parse_and_display() {
        assert_eq!(ErrorCode::parse("99.1"), Some(ErrorCode::TRANSLATION));
        assert_eq!(ErrorCode::parse(" 40 "), Some(ErrorCode::new(40, 0)));
        assert_eq!(ErrorCode::parse("x.1"), None);
        assert_eq!(ErrorCode::new(98, 913).to_string(), "98.913");
        assert_eq!(ErrorCode::new(40, 0).to_string(), "40");
    }

    #[test]
    fn substitution_markers_are_replaced() {
        let subs = vec!["x".to_string(), "y".to_string()];
        assert_eq!(substitute("a &1 b &2 c &3", &subs), "a x b y c ");
        assert_eq!(substitute("R&D &", &subs), "R&D &");
    }

    #[test]
    fn catalog_formats_translation_error() {
        let text = DefaultCatalog.format(ErrorCode::TRANSLATION, &["x".into(), "y".into()]);
        assert_eq!(text, "Translation error in \"x\": y");
        assert_eq!(DefaultCatalog.error_text(99), Some("Translation error"));
        assert_eq!(
            DefaultCatalog.format(ErrorCode::new(99, 77), &[]),
            "Translation error",
            "unknown minor falls back to the major text"
        );
    }
}
