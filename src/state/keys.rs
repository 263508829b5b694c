//! Closed, typed state-key sets for the two store scopes.
//!
//! Keys are enums rather than strings so an unknown key is a compile
//! error, and so pipeline composition can check read/write declarations
//! structurally before any run starts.

use serde::{Deserialize, Serialize};

/// Keys scoped to one review conversation. Cleared when a new submission
/// starts a fresh review pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionKey {
    SubmittedCode,
    CodeLineCount,
    StructuralAnalysis,
    SyntaxError,
    StyleScore,
    StyleIssues,
    TestResults,
    GradingAttempts,
    FinalFeedback,
    FinalGrade,
    FixWorthy,
    ScoreImprovement,
    FixAttempts,
    FixedCode,
    FixTestResults,
    FixStatus,
    FixReport,
}

impl SessionKey {
    pub const ALL: [SessionKey; 17] = [
        SessionKey::SubmittedCode,
        SessionKey::CodeLineCount,
        SessionKey::StructuralAnalysis,
        SessionKey::SyntaxError,
        SessionKey::StyleScore,
        SessionKey::StyleIssues,
        SessionKey::TestResults,
        SessionKey::GradingAttempts,
        SessionKey::FinalFeedback,
        SessionKey::FinalGrade,
        SessionKey::FixWorthy,
        SessionKey::ScoreImprovement,
        SessionKey::FixAttempts,
        SessionKey::FixedCode,
        SessionKey::FixTestResults,
        SessionKey::FixStatus,
        SessionKey::FixReport,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionKey::SubmittedCode => "submitted_code",
            SessionKey::CodeLineCount => "code_line_count",
            SessionKey::StructuralAnalysis => "structural_analysis",
            SessionKey::SyntaxError => "syntax_error",
            SessionKey::StyleScore => "style_score",
            SessionKey::StyleIssues => "style_issues",
            SessionKey::TestResults => "test_results",
            SessionKey::GradingAttempts => "grading_attempts",
            SessionKey::FinalFeedback => "final_feedback",
            SessionKey::FinalGrade => "final_grade",
            SessionKey::FixWorthy => "fix_worthy",
            SessionKey::ScoreImprovement => "score_improvement",
            SessionKey::FixAttempts => "fix_attempts",
            SessionKey::FixedCode => "fixed_code",
            SessionKey::FixTestResults => "fix_test_results",
            SessionKey::FixStatus => "fix_status",
            SessionKey::FixReport => "fix_report",
        }
    }
}

impl std::fmt::Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Keys scoped to one submitter across all of their sessions.
/// Mutated only by the feedback stage at the end of a review pass;
/// `FeedbackHistory` is append-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserKey {
    TotalSubmissions,
    LastStyleScore,
    LastSubmissionTime,
    LastTestPassRate,
    FeedbackHistory,
    LastReport,
}

impl UserKey {
    pub const ALL: [UserKey; 6] = [
        UserKey::TotalSubmissions,
        UserKey::LastStyleScore,
        UserKey::LastSubmissionTime,
        UserKey::LastTestPassRate,
        UserKey::FeedbackHistory,
        UserKey::LastReport,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            UserKey::TotalSubmissions => "total_submissions",
            UserKey::LastStyleScore => "last_style_score",
            UserKey::LastSubmissionTime => "last_submission_time",
            UserKey::LastTestPassRate => "last_test_pass_rate",
            UserKey::FeedbackHistory => "feedback_history",
            UserKey::LastReport => "last_report",
        }
    }
}

impl std::fmt::Display for UserKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
