//! Diagnostics shared by every compiler stage.
//!
//! Stages never fail: they return a [`Report`] carrying a best-effort value
//! together with the diagnostics collected so far. Only the convenience entry
//! points in the crate root turn a non-empty diagnostic list into a
//! [`CompileFailure`].

use serde::Serialize;

use crate::lexer::{Position, Token};

/// Stable numeric diagnostic codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(u32)]
pub enum CompileErrorCode {
    // Lexer
    UnknownSymbol = 1000,
    UnclosedStringLiteral = 1001,
    UnclosedBlockComment = 1002,
    UnclosedFunctionExpression = 1003,

    // Parser
    UnexpectedToken = 1100,
    UnexpectedEof = 1101,
    MissingOperand = 1102,
    UnmatchedBracket = 1103,
    InvalidOperator = 1104,
    ExpectedElementBody = 1105,
    EmptyAttributeName = 1106,
    NestingTooDeep = 1107,

    // Element shape and context
    InvalidContext = 3000,
    InvalidName = 3001,
    UnexpectedName = 3002,
    NameNotFound = 3003,
    InvalidAlias = 3004,
    UnexpectedAlias = 3005,
    UnexpectedSettings = 3006,
    UnexpectedSimpleBody = 3007,
    UnexpectedComplexBody = 3008,

    // Name registration
    DuplicateName = 3010,
    DuplicateColumnName = 3011,
    DuplicateEnumFieldName = 3012,
    DuplicateTableGroupFieldName = 3013,
    DuplicateTablePartialInjection = 3014,
    DuplicateProject = 3015,

    // Settings
    UnknownTableSetting = 3020,
    DuplicateTableSetting = 3021,
    InvalidTableSettingValue = 3022,
    UnknownColumnSetting = 3023,
    DuplicateColumnSetting = 3024,
    InvalidColumnSettingValue = 3025,
    ConflictingSetting = 3026,
    UnknownRefSetting = 3027,
    DuplicateRefSetting = 3028,
    InvalidRefSettingValue = 3029,
    UnknownIndexSetting = 3030,
    DuplicateIndexSetting = 3031,
    InvalidIndexSettingValue = 3032,
    UnknownEnumFieldSetting = 3033,
    DuplicateEnumFieldSetting = 3034,
    InvalidEnumFieldSettingValue = 3035,
    UnknownTableGroupSetting = 3036,
    DuplicateTableGroupSetting = 3037,
    InvalidTableGroupSettingValue = 3038,
    UnknownCheckSetting = 3039,
    DuplicateCheckSetting = 3040,
    InvalidCheckSettingValue = 3041,
    UnknownNoteSetting = 3042,
    DuplicateNoteSetting = 3043,
    InvalidNoteSettingValue = 3044,
    UnknownDepSetting = 3045,
    DuplicateDepSetting = 3046,
    InvalidDepSettingValue = 3047,

    // Element bodies
    InvalidColumn = 3050,
    InvalidColumnName = 3051,
    InvalidColumnType = 3052,
    EmptyTable = 3060,
    EmptyEnum = 3061,
    EmptyIndexes = 3062,
    EmptyRef = 3063,
    InvalidEnumField = 3064,
    InvalidIndexField = 3065,
    InvalidCheckField = 3066,
    InvalidTableGroupField = 3067,
    InvalidProjectField = 3068,
    InvalidRefField = 3069,
    InvalidNoteContent = 3070,
    NoteRedefined = 3071,
    InvalidCustomElementValue = 3072,
    InvalidTablePartialInjection = 3073,
    InvalidDepField = 3074,
    EmptyDep = 3075,
    RefRedefined = 3076,
    EmptyChecks = 3077,

    // Binding and interpretation
    BindingError = 3100,
    SameEndpoint = 3101,
    UnequalFieldsBinaryRef = 3102,
    TableInMultipleGroups = 3103,
    DuplicateRef = 3104,
}

impl CompileErrorCode {
    pub fn as_u32(self) -> u32 {
        self as u32
    }
}

/// Severity attached to the public diagnostic record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

/// A diagnostic anchored to a byte range of the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileError {
    pub code: CompileErrorCode,
    pub message: String,
    pub start: usize,
    pub end: usize,
    pub start_pos: Position,
    pub end_pos: Position,
    pub severity: Severity,
}

impl CompileError {
    pub fn new(
        code: CompileErrorCode,
        message: impl Into<String>,
        (start, start_pos): (usize, Position),
        (end, end_pos): (usize, Position),
    ) -> Self {
        Self {
            code,
            message: message.into(),
            start,
            end,
            start_pos,
            end_pos,
            severity: Severity::Error,
        }
    }

    pub fn at_token(code: CompileErrorCode, message: impl Into<String>, token: &Token) -> Self {
        Self::new(
            code,
            message,
            (token.start, token.start_pos),
            (token.end, token.end_pos),
        )
    }

    /// Public 1-based record handed to tooling and exporters.
    pub fn to_diagnostic(&self) -> Diagnostic {
        Diagnostic {
            message: self.message.clone(),
            location: Location {
                start: LineColumn::from(self.start_pos),
                end: Some(LineColumn::from(self.end_pos)),
            },
            code: self.code.as_u32(),
            severity: self.severity,
        }
    }
}

impl std::fmt::Display for CompileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}: {} [{}]",
            self.start_pos.line + 1,
            self.start_pos.column + 1,
            self.message,
            self.code.as_u32()
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub message: String,
    pub location: Location,
    pub code: u32,
    #[serde(rename = "type")]
    pub severity: Severity,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Location {
    pub start: LineColumn,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<LineColumn>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LineColumn {
    pub line: usize,
    pub column: usize,
}

impl From<Position> for LineColumn {
    fn from(pos: Position) -> Self {
        Self {
            line: pos.line + 1,
            column: pos.column + 1,
        }
    }
}

/// A value plus the diagnostics produced while computing it.
#[derive(Debug, Clone)]
pub struct Report<T> {
    value: T,
    errors: Vec<CompileError>,
}

impl<T> Report<T> {
    pub fn new(value: T, errors: Vec<CompileError>) -> Self {
        Self { value, errors }
    }

    pub fn ok(value: T) -> Self {
        Self::new(value, Vec::new())
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn errors(&self) -> &[CompileError] {
        &self.errors
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn into_parts(self) -> (T, Vec<CompileError>) {
        (self.value, self.errors)
    }

    /// Feed the value to the next stage, keeping every diagnostic so far.
    pub fn chain<U>(self, f: impl FnOnce(T) -> Report<U>) -> Report<U> {
        let Report { value, mut errors } = self;
        let next = f(value);
        errors.extend(next.errors);
        Report::new(next.value, errors)
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Report<U> {
        Report::new(f(self.value), self.errors)
    }
}

/// Raised by the convenience API when compilation produced diagnostics.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{} compile error(s), first: {}", .diagnostics.len(), first_message(.diagnostics))]
pub struct CompileFailure {
    pub diagnostics: Vec<CompileError>,
}

fn first_message(diagnostics: &[CompileError]) -> String {
    diagnostics
        .first()
        .map(ToString::to_string)
        .unwrap_or_default()
}

impl CompileFailure {
    pub fn to_diagnostics(&self) -> Vec<Diagnostic> {
        self.diagnostics
            .iter()
            .map(CompileError::to_diagnostic)
            .collect()
    }
}
