//! An anchor-based text patcher that splices replacements at exact substring
//! matches.
//!
//! `apatch` applies small, mechanical source edits without a parser for the
//! target language: it locates a known substring (an "anchor") in a file's
//! text, optionally scoped to occur at or after a second anchor (for example a
//! function definition), and splices a replacement in at that position. It
//! also resolves merge-conflict regions by substituting an exact conflict
//! block — sentinel lines included — with a reconciled block.
//!
//! Matching is exact and case-sensitive. There is no fuzzy matching, no
//! regular-expression semantics, and no whitespace normalization: an anchor
//! either occurs verbatim in the document or the edit reports a miss.
//!
//! ## Getting Started
//!
//! The most common use case is to parse an edit script from a string (e.g., a
//! markdown file) and apply it to a file on disk. This example shows the
//! end-to-end process in a temporary directory.
//!
//! ````rust
//! use apatch::{parse_edits, apply_patch_set_to_file, ApplyOptions};
//! use std::fs;
//! use tempfile::tempdir;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // 1. Set up a temporary directory and a file to be patched.
//! let dir = tempdir()?;
//! let file_path = dir.path().join("src/config.rs");
//! fs::create_dir_all(file_path.parent().unwrap())?;
//! fs::write(&file_path, "a: Foo::default(),\nb: 1\n")?;
//!
//! // 2. Define the edit script, as if it came from a markdown file.
//! let script = r#"
//! Some introductory text.
//!
//! ```splice
//! file: src/config.rs
//! <<< match
//! a: Foo::default(),
//! === replace
//! a: Bar::new(),
//! >>>
//! ```
//!
//! Some concluding text.
//! "#;
//!
//! // 3. Parse the script to get a list of per-file edit sets.
//! let sets = parse_edits(script)?;
//! assert_eq!(sets.len(), 1);
//!
//! // 4. Apply the edits.
//! let options = ApplyOptions::default();
//! let result = apply_patch_set_to_file(&sets[0], dir.path(), options)?;
//! assert!(result.report.all_applied_cleanly());
//!
//! // 5. Verify the file was changed correctly.
//! let new_content = fs::read_to_string(&file_path)?;
//! assert_eq!(new_content, "a: Bar::new(),\nb: 1\n");
//! # Ok(())
//! # }
//! ````
//!
//! ## Key Concepts
//!
//! ### The Patching Workflow
//!
//! Using the `apatch` library typically involves a two-step process:
//!
//! 1.  **Parsing:** Use [`parse_edits`] to read a string and extract a
//!     `Vec<PatchSet>`. This function is markdown-aware, searching for code
//!     blocks annotated with `splice` or `anchor` (e.g., ` ```splice`,
//!     ` ```text, anchor`) and parsing their contents. This step is purely
//!     in-memory.
//! 2.  **Applying:** Use one of the `apply` functions to apply the changes.
//!     - [`apply_patch_set_to_file`]: The most convenient function for CLI
//!       tools. It handles reading the original file and writing the new
//!       content back to disk.
//!     - [`apply_edits`]: A pure function for in-memory operations. It takes
//!       the original content as a string and returns the new content.
//!
//! ### Anchors, Scopes, and Occurrences
//!
//! - A **target anchor** is the exact span of text to be replaced.
//! - A **scope anchor** establishes a lower bound for the search: the target
//!   anchor is only looked for at or after the scope anchor's position. If
//!   the scope anchor is absent, the whole edit misses — scope establishment
//!   is mandatory when requested.
//! - An **occurrence index** selects which match of a repeated target anchor
//!   to act on (1-based). Occurrences are counted strictly left-to-right and
//!   non-overlapping: the search for the next occurrence begins at the end of
//!   the previous match, not one character past its start.
//!
//! A missing anchor is an explicit outcome value, never a panic. Whether a
//! miss fails the run or is merely recorded is controlled per edit by
//! [`MissingPolicy`].
//!
//! ### Conflict Resolution
//!
//! A resolve edit replaces **all** verbatim occurrences of a conflict-marker
//! region with a reconciled block. Absence of the region is not an error —
//! the conflict may already be resolved — so a second application after
//! success is a no-op ([`EditStatus::AlreadyResolved`]).
//!
//! ## Advanced Usage
//!
//! ### In-Memory Operations and Miss Handling
//!
//! ````rust
//! use apatch::{parse_edits, apply_edits, EditError};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let original = "left\nmiddle\nright\n";
//! let script = r#"
//! ```splice
//! file: notes.txt
//! <<< match
//! middle
//! === replace
//! center
//! >>>
//! <<< match
//! NO SUCH TEXT
//! === replace
//! irrelevant
//! >>>
//! ```
//! "#;
//! let sets = parse_edits(script)?;
//! let result = apply_edits(original, &sets[0].edits)?;
//!
//! // The first edit landed, the second missed.
//! assert!(!result.report.all_applied_cleanly());
//! let failures = result.report.failures();
//! assert_eq!(failures.len(), 1);
//! assert_eq!(failures[0].edit_index, 2); // Edit indices are 1-based.
//! assert!(matches!(
//!     failures[0].reason,
//!     EditError::TargetAnchorNotFound { occurrence: 1 }
//! ));
//!
//! // The content was still modified by the successful first edit.
//! assert_eq!(result.new_content, "left\ncenter\nright\n");
//! # Ok(())
//! # }
//! ````
//!
//! ### Step-by-Step Application with `EditApplier`
//!
//! For maximum control, you can use the [`EditApplier`] iterator to apply
//! edits one at a time and inspect the document between each step.
//!
//! ```rust
//! use apatch::{Edit, EditApplier, EditStatus, SpliceEdit, MissingPolicy};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let edits = vec![Edit::Splice(SpliceEdit {
//!     scope: None,
//!     anchor: "world".to_string(),
//!     occurrence: 1,
//!     replacement: "apatch".to_string(),
//!     on_missing: MissingPolicy::Fail,
//! })];
//!
//! let mut applier = EditApplier::new("hello world\n", &edits)?;
//! let status = applier.next().unwrap();
//! assert!(matches!(status, EditStatus::Applied { .. }));
//! assert!(applier.next().is_none());
//! assert_eq!(applier.into_content(), "hello apatch\n");
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature Flags
//!
//! ### `parallel`
//!
//! - **Enabled by default.**
//! - This feature enables parallel processing for batch application using the
//!   [`rayon`](https://crates.io/crates/rayon) crate. Edit sets for distinct
//!   files are independent, so [`apply_patch_sets_to_dir`] distributes them
//!   across the thread pool. Within a single file, edits are always applied
//!   as an ordered sequence — each edit consumes the previous edit's output,
//!   because a splice earlier in the document invalidates later offsets.
//!
//! - **To disable this feature**, specify `default-features = false` in your
//!   `Cargo.toml`:
//!   ```toml
//!   [dependencies]
//!   apatch = { version = "0.1.0", default-features = false }
//!   ```
use log::{debug, info, trace, warn};
#[cfg(feature = "parallel")]
use rayon::prelude::*;
use similar::udiff::unified_diff;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

// --- Error Types ---

/// Represents errors that can occur during the parsing of an edit script.
#[derive(Error, Debug, PartialEq)]
pub enum ParseError {
    /// An edit section was found before any `file:` directive named a target.
    #[error(
        "Edit section on line {line} was found without a file path directive (e.g., 'file: path/to/file')"
    )]
    MissingFileHeader {
        /// The line number where the edit section started.
        line: usize,
    },
    /// An edit section was opened with `<<<` but never closed with `>>>`.
    #[error("Edit section starting on line {line} is not terminated by '>>>'")]
    UnterminatedSection { line: usize },
    /// An edit section has no `=== replace` separator between its match block
    /// and its replacement block.
    #[error("Edit section starting on line {line} has no '=== replace' separator")]
    MissingReplaceSeparator { line: usize },
    /// An edit section's match block is empty. An empty anchor would match
    /// everywhere, so it is rejected at parse time.
    #[error("Edit section starting on line {line} has an empty match block")]
    EmptyMatchBlock { line: usize },
    /// A directive line could not be understood (e.g., `occurrence: zero`).
    #[error("Invalid directive on line {line}: '{directive}'")]
    InvalidDirective { line: usize, directive: String },
    /// A `scope:`, `occurrence:`, or `if-missing:` directive preceded a
    /// conflict section. Conflict regions are matched verbatim and replaced
    /// wholesale, so none of these apply.
    #[error(
        "Conflict section on line {line} does not accept scope, occurrence, or if-missing directives"
    )]
    DirectiveNotAllowed { line: usize },
}

/// Represents the possible "hard" errors that can occur during patch
/// operations. Unlike a missing anchor, these stop the operation for the
/// affected file entirely.
#[derive(Error, Debug)]
pub enum PatchError {
    /// The edit set attempted to access a path outside the target directory.
    /// This is a security measure to prevent malicious scripts from modifying
    /// unintended files (e.g., `file: ../../etc/passwd`).
    #[error("Path '{0}' resolves outside the target directory. Aborting for security.")]
    PathTraversal(PathBuf),
    /// The target file for an edit set could not be found. There is no file
    /// creation in this system; targets must exist.
    #[error("Target file not found for patching: {0}")]
    TargetNotFound(PathBuf),
    /// The user does not have permission to read or write to the specified path.
    #[error("Permission denied for path: {path:?}")]
    PermissionDenied { path: PathBuf },
    /// The target path for an edit set exists but is a directory, not a file.
    #[error("Target path is a directory, not a file: {path:?}")]
    TargetIsDirectory { path: PathBuf },
    /// The target file's bytes are not valid UTF-8. Offsets are byte offsets
    /// into UTF-8 text, so the document is rejected rather than decoded on a
    /// best-effort basis.
    #[error("File {path:?} is not valid UTF-8")]
    Encoding { path: PathBuf },
    /// An edit in the set violated the core contract (e.g., an empty anchor).
    /// Scripts produced by [`parse_edits`] never contain such edits.
    #[error("Invalid edit for {path:?}: {source}")]
    InvalidEdit {
        path: PathBuf,
        #[source]
        source: SpliceError,
    },
    /// An I/O error occurred while reading or writing a file.
    #[error("I/O error while processing {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A violation of the core search contract, detected before any search runs.
///
/// These are programming errors in the supplied edit, not properties of the
/// document, and are therefore returned as `Err` rather than as a miss.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpliceError {
    /// An empty anchor would match at every position.
    #[error("Anchor must not be empty")]
    EmptyAnchor,
    /// Occurrence indices are 1-based; zero selects nothing.
    #[error("Occurrence index is 1-based and must not be zero")]
    ZeroOccurrence,
    /// The start offset is past the end of the document or not on a
    /// character boundary.
    #[error("Start offset {0} is out of bounds or not on a character boundary")]
    InvalidOffset(usize),
}

/// The reason a splice edit failed to land.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EditError {
    /// The scope anchor is absent from the document. Scope establishment is
    /// mandatory when requested, so the target anchor is not even searched for.
    #[error("Scope anchor not found")]
    ScopeAnchorNotFound,
    /// Fewer than `occurrence` matches of the target anchor exist at or after
    /// the search start.
    #[error("Target anchor not found (occurrence {occurrence})")]
    TargetAnchorNotFound { occurrence: usize },
    /// The edit itself violated the core contract. [`EditApplier::new`]
    /// rejects such edits eagerly, so this only surfaces through direct use
    /// of an [`EditLocator`].
    #[error("Invalid edit: {0}")]
    InvalidEdit(#[from] SpliceError),
}

// --- Data Structures ---

/// What to do when a splice edit's anchor is missing from the document.
///
/// The policy is carried per edit rather than decided ad hoc at each call
/// site: the same miss can be fatal for one edit and expected for another
/// (e.g., an edit that a previous run already applied).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MissingPolicy {
    /// Record the miss as a failure; the run exits non-zero.
    #[default]
    Fail,
    /// Record the miss and continue; the run still counts as clean.
    Skip,
}

/// A single anchor-based replacement: find the `occurrence`-th match of
/// `anchor` (at or after `scope`, when given) and splice `replacement` in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpliceEdit {
    /// Optional scope anchor. When present, it is located from the start of
    /// the document and the target search begins at its position. When it is
    /// absent from the document, the edit misses with
    /// [`EditError::ScopeAnchorNotFound`].
    pub scope: Option<String>,
    /// The exact span of text to be replaced.
    pub anchor: String,
    /// Which match of `anchor` to act on, 1-based.
    pub occurrence: usize,
    /// The text spliced in over the matched span. May be empty (deletion).
    pub replacement: String,
    /// Whether a miss fails the run or is merely recorded.
    pub on_missing: MissingPolicy,
}

impl SpliceEdit {
    /// Checks the edit against the core contract without searching anything.
    pub fn validate(&self) -> Result<(), SpliceError> {
        if self.anchor.is_empty() {
            return Err(SpliceError::EmptyAnchor);
        }
        if self.scope.as_deref().is_some_and(str::is_empty) {
            return Err(SpliceError::EmptyAnchor);
        }
        if self.occurrence == 0 {
            return Err(SpliceError::ZeroOccurrence);
        }
        Ok(())
    }
}

/// A conflict-marker resolution: replace every verbatim occurrence of
/// `marker` with `replacement`.
///
/// The marker is an exact multi-line literal, sentinel lines included. All
/// occurrences are replaced so that a second application finds nothing to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolveEdit {
    /// The conflict-marker region to eliminate, verbatim.
    pub marker: String,
    /// The reconciled block substituted for each occurrence.
    pub replacement: String,
}

/// One edit within a [`PatchSet`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Edit {
    /// An anchor-based replacement of a single span.
    Splice(SpliceEdit),
    /// A conflict-marker resolution replacing all occurrences.
    Resolve(ResolveEdit),
}

impl Edit {
    /// Checks the edit against the core contract without searching anything.
    pub fn validate(&self) -> Result<(), SpliceError> {
        match self {
            Edit::Splice(edit) => edit.validate(),
            Edit::Resolve(edit) => {
                if edit.marker.is_empty() {
                    Err(SpliceError::EmptyAnchor)
                } else {
                    Ok(())
                }
            }
        }
    }
}

/// Represents the span a splice edit replaced (or would replace).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpliceLocation {
    /// The byte offset of the match in the document.
    pub offset: usize,
    /// The 1-based line number the match starts on.
    pub line: usize,
    /// The byte length of the matched anchor.
    pub len: usize,
}

impl std::fmt::Display for SpliceLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "line {}", self.line)
    }
}

/// Represents all the edits to be applied to a single file, in order.
///
/// A `PatchSet` is derived from the sections following a `file:` directive
/// within a ` ```splice` block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchSet {
    /// The relative path of the file to be patched, from the target directory.
    pub file_path: PathBuf,
    /// The edits to apply. Order matters: each edit operates on the output of
    /// the previous one.
    pub edits: Vec<Edit>,
}

/// Options for configuring how a patch set is applied.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApplyOptions {
    /// If `true`, no files will be modified. Instead, a diff of the proposed
    /// changes will be generated and returned in [`PatchResult`].
    pub dry_run: bool,
}

/// The result of applying a single splice edit in isolation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpliceOutcome {
    /// The edit landed; `new_content` is the full rewritten document.
    Applied {
        new_content: String,
        location: SpliceLocation,
    },
    /// An anchor was absent. The document is unchanged.
    NotFound(EditError),
}

/// The result of resolving a conflict marker in isolation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveOutcome {
    /// At least one occurrence of the marker was replaced.
    Resolved {
        new_content: String,
        occurrences: usize,
    },
    /// The marker does not occur; nothing to do. Distinct from a miss: the
    /// conflict may already be resolved.
    Unchanged,
}

/// The result of applying a single edit within a sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditStatus {
    /// The splice edit was applied at `location`.
    Applied { location: SpliceLocation },
    /// The resolve edit replaced `occurrences` conflict region(s).
    Resolved { occurrences: usize },
    /// The resolve edit found no conflict region; a successful no-op.
    AlreadyResolved,
    /// The splice edit missed under [`MissingPolicy::Skip`].
    SkippedMissing(EditError),
    /// The splice edit missed under [`MissingPolicy::Fail`].
    Failed(EditError),
}

/// The result of an `apply_patch_set_to_file` operation.
#[derive(Debug, Clone, PartialEq)]
pub struct PatchResult {
    /// Detailed results for each edit within the patch operation.
    pub report: ApplyReport,
    /// The unified diff of the proposed changes. This is only populated
    /// when `dry_run` was set to `true` in [`ApplyOptions`].
    pub diff: Option<String>,
}

/// The result of an in-memory patch operation.
#[derive(Debug, Clone, PartialEq)]
pub struct InMemoryResult {
    /// The new content after applying the edits.
    pub new_content: String,
    /// Detailed results for each edit within the patch operation.
    pub report: ApplyReport,
}

/// Contains detailed results for each edit within a patch operation.
#[derive(Debug, Clone, PartialEq)]
pub struct ApplyReport {
    /// A list of statuses, one for each edit in the original set.
    pub edit_results: Vec<EditStatus>,
}

/// Details about an edit that failed to apply.
#[derive(Debug, Clone, PartialEq)]
pub struct EditFailure {
    /// The 1-based index of the edit that failed.
    pub edit_index: usize,
    /// The reason for the failure.
    pub reason: EditError,
}

impl ApplyReport {
    /// Checks if all edits in the set were applied, resolved, or skipped.
    ///
    /// Returns `false` if any edit failed. A miss under
    /// [`MissingPolicy::Skip`] and an [`EditStatus::AlreadyResolved`] no-op
    /// both count as clean.
    ///
    /// # Example
    ///
    /// ```
    /// # use apatch::{ApplyReport, EditStatus, EditError, SpliceLocation};
    /// let clean = ApplyReport {
    ///     edit_results: vec![
    ///         EditStatus::Applied { location: SpliceLocation { offset: 0, line: 1, len: 3 } },
    ///         EditStatus::AlreadyResolved,
    ///     ],
    /// };
    /// assert!(clean.all_applied_cleanly());
    ///
    /// let failed = ApplyReport {
    ///     edit_results: vec![
    ///         EditStatus::Failed(EditError::TargetAnchorNotFound { occurrence: 1 }),
    ///     ],
    /// };
    /// assert!(!failed.all_applied_cleanly());
    /// ```
    pub fn all_applied_cleanly(&self) -> bool {
        self.edit_results
            .iter()
            .all(|r| !matches!(r, EditStatus::Failed(_)))
    }

    /// Returns a list of all edits that failed to apply, along with their index.
    ///
    /// This provides a more convenient way to inspect failures than iterating
    /// through [`edit_results`](Self::edit_results) manually.
    pub fn failures(&self) -> Vec<EditFailure> {
        self.edit_results
            .iter()
            .enumerate()
            .filter_map(|(i, status)| {
                if let EditStatus::Failed(reason) = status {
                    Some(EditFailure {
                        edit_index: i + 1,
                        reason: reason.clone(),
                    })
                } else {
                    None
                }
            })
            .collect()
    }
}

/// The result of applying a batch of patch sets to a directory.
#[derive(Debug)]
pub struct BatchResult {
    /// A list of results for each patch operation attempted.
    /// Each entry is a tuple of the target file path and the result of the operation.
    pub results: Vec<(PathBuf, Result<PatchResult, PatchError>)>,
}

impl BatchResult {
    /// Checks if all patch sets in the batch were applied without "hard"
    /// errors (like I/O errors). This does *not* check if all edits landed
    /// cleanly. For that, you must inspect the individual `PatchResult`
    /// objects.
    pub fn all_succeeded(&self) -> bool {
        self.results.iter().all(|(_, res)| res.is_ok())
    }

    /// Returns a list of all operations that resulted in a "hard" error (e.g., I/O).
    pub fn hard_failures(&self) -> Vec<(&PathBuf, &PatchError)> {
        self.results
            .iter()
            .filter_map(|(path, res)| res.as_ref().err().map(|e| (path, e)))
            .collect()
    }
}

// --- Script Parsing ---

/// Opens a splice section. The match block follows on subsequent lines.
const SECTION_MATCH: &str = "<<< match";
/// Opens a conflict-resolution section.
const SECTION_CONFLICT: &str = "<<< conflict";
/// Separates the match block from the replacement block.
const SECTION_SEPARATOR: &str = "=== replace";
/// Terminates a section.
const SECTION_END: &str = ">>>";

/// Checks whether a line opens a fenced code block tagged as an edit script.
///
/// The info string is treated as a comma-separated list of tags, where each
/// tag can have multiple words; any word equal to `splice` or `anchor` marks
/// the block as ours.
fn is_script_fence(line: &str) -> bool {
    if !line.starts_with("```") {
        return false;
    }
    let info_string = &line[3..];
    info_string.split(',').any(|part| {
        part.split_whitespace()
            .any(|word| word == "splice" || word == "anchor")
    })
}

/// Parses a string containing one or more markdown edit-script blocks into a
/// vector of [`PatchSet`] objects.
///
/// This function scans the input `content` for markdown-style code blocks
/// annotated with `splice` or `anchor` (e.g., ` ````splice ... ``` `,
/// ` ````text, anchor ... ``` `). It can handle multiple blocks in one
/// string, and multiple file sections within a single block. Sections for the
/// same file within one block are merged into a single `PatchSet`, preserving
/// their order.
///
/// Inside a block, line-oriented directives configure the next section:
///
/// - `file: <path>` — the target file, persisting until the next `file:` line.
/// - `scope: <literal>` — a single-line scope anchor for the next splice.
/// - `occurrence: <N>` — the 1-based occurrence index (default 1).
/// - `if-missing: fail|skip` — the missing-anchor policy (default `fail`).
///
/// The section body itself is framed by whole-line sentinels: `<<< match`
/// (or `<<< conflict`), `=== replace`, and `>>>`. Body lines are taken
/// verbatim and joined with `\n`. Because the framing requires whole-line
/// equality, merge-conflict sentinel lines (`<<<<<<< HEAD`, `=======`,
/// `>>>>>>> branch`) inside a conflict body pass through unharmed.
///
/// # Errors
///
/// Returns a [`ParseError`] if a section has no preceding `file:` directive,
/// is unterminated, lacks the `=== replace` separator, has an empty match
/// block, or follows an invalid directive.
///
/// # Example
///
/// ````rust
/// use apatch::{parse_edits, Edit};
///
/// let script = r#"
/// ```splice
/// file: src/config.rs
/// scope: pub fn load_from_env
/// occurrence: 2
/// <<< match
/// api: ApiConfig::default(),
/// === replace
/// api: hosted_api_config(),
/// >>>
/// ```
/// "#;
///
/// let sets = parse_edits(script).unwrap();
/// assert_eq!(sets.len(), 1);
/// assert_eq!(sets[0].file_path.to_str(), Some("src/config.rs"));
/// match &sets[0].edits[0] {
///     Edit::Splice(edit) => {
///         assert_eq!(edit.scope.as_deref(), Some("pub fn load_from_env"));
///         assert_eq!(edit.occurrence, 2);
///     }
///     other => panic!("unexpected edit: {:?}", other),
/// }
/// ````
pub fn parse_edits(content: &str) -> Result<Vec<PatchSet>, ParseError> {
    let mut all_sets: Vec<PatchSet> = Vec::new();
    let mut lines = content.lines().enumerate().peekable();

    // The `any` call consumes the iterator until it finds the start of a
    // script block. The loop continues searching for more blocks from where
    // the last one ended.
    while lines.by_ref().any(|(_, line)| is_script_fence(line)) {
        // Patch sets collected from this block. Sections are merged into the
        // set for their file as they are parsed, so section order per file is
        // preserved.
        let mut block_sets: Vec<PatchSet> = Vec::new();

        // State variables for the parser as it moves through the block.
        let mut current_file: Option<PathBuf> = None;
        let mut pending_scope: Option<String> = None;
        let mut pending_occurrence: Option<usize> = None;
        let mut pending_policy: Option<MissingPolicy> = None;

        // Consume lines within the ```splice block.
        while let Some((index, line)) = lines.next() {
            let line_number = index + 1; // Convert 0-based index to 1-based line number
            if line == "```" {
                break; // End of block
            }

            if let Some(value) = line.strip_prefix("file:") {
                let path = value.trim();
                if path.is_empty() {
                    return Err(ParseError::InvalidDirective {
                        line: line_number,
                        directive: line.trim().to_string(),
                    });
                }
                current_file = Some(PathBuf::from(path));
            } else if let Some(value) = line.strip_prefix("scope:") {
                let scope = value.trim();
                if scope.is_empty() {
                    return Err(ParseError::InvalidDirective {
                        line: line_number,
                        directive: line.trim().to_string(),
                    });
                }
                pending_scope = Some(scope.to_string());
            } else if let Some(value) = line.strip_prefix("occurrence:") {
                match value.trim().parse::<usize>().ok().filter(|&n| n > 0) {
                    Some(n) => pending_occurrence = Some(n),
                    None => {
                        return Err(ParseError::InvalidDirective {
                            line: line_number,
                            directive: line.trim().to_string(),
                        })
                    }
                }
            } else if let Some(value) = line.strip_prefix("if-missing:") {
                pending_policy = Some(match value.trim() {
                    "fail" => MissingPolicy::Fail,
                    "skip" => MissingPolicy::Skip,
                    _ => {
                        return Err(ParseError::InvalidDirective {
                            line: line_number,
                            directive: line.trim().to_string(),
                        })
                    }
                });
            } else if line == SECTION_MATCH || line == SECTION_CONFLICT {
                let is_conflict = line == SECTION_CONFLICT;
                let (anchor, replacement) = parse_section_body(&mut lines, line_number)?;

                let Some(file) = current_file.clone() else {
                    return Err(ParseError::MissingFileHeader { line: line_number });
                };
                if anchor.is_empty() {
                    return Err(ParseError::EmptyMatchBlock { line: line_number });
                }

                let edit = if is_conflict {
                    if pending_scope.is_some()
                        || pending_occurrence.is_some()
                        || pending_policy.is_some()
                    {
                        return Err(ParseError::DirectiveNotAllowed { line: line_number });
                    }
                    Edit::Resolve(ResolveEdit {
                        marker: anchor,
                        replacement,
                    })
                } else {
                    Edit::Splice(SpliceEdit {
                        scope: pending_scope.take(),
                        anchor,
                        occurrence: pending_occurrence.take().unwrap_or(1),
                        replacement,
                        on_missing: pending_policy.take().unwrap_or_default(),
                    })
                };

                // Merge into an existing set for this file, the way repeated
                // sections for one file in a unified diff merge into one patch.
                if let Some(existing) = block_sets.iter_mut().find(|s| s.file_path == file) {
                    existing.edits.push(edit);
                } else {
                    block_sets.push(PatchSet {
                        file_path: file,
                        edits: vec![edit],
                    });
                }
            }
            // Any other line inside the block is commentary; ignore it.
        }

        all_sets.extend(block_sets);
    }

    Ok(all_sets)
}

/// Consumes a section body up to the terminating `>>>`, returning the match
/// block and the replacement block, each joined with `\n`.
fn parse_section_body<'a>(
    lines: &mut impl Iterator<Item = (usize, &'a str)>,
    section_line: usize,
) -> Result<(String, String), ParseError> {
    let mut match_lines: Vec<&str> = Vec::new();
    let mut replace_lines: Vec<&str> = Vec::new();
    let mut in_replace = false;
    let mut terminated = false;

    for (_, line) in lines.by_ref() {
        if line == SECTION_END {
            terminated = true;
            break;
        }
        if line == "```" {
            // The fence closed while the section was still open.
            return Err(ParseError::UnterminatedSection { line: section_line });
        }
        if !in_replace && line == SECTION_SEPARATOR {
            in_replace = true;
            continue;
        }
        if in_replace {
            replace_lines.push(line);
        } else {
            match_lines.push(line);
        }
    }

    if !terminated {
        return Err(ParseError::UnterminatedSection { line: section_line });
    }
    if !in_replace {
        return Err(ParseError::MissingReplaceSeparator { line: section_line });
    }

    Ok((match_lines.join("\n"), replace_lines.join("\n")))
}

// --- Core Logic ---

/// Searches for the first occurrence of `anchor` at or after `start_offset`.
///
/// Matching is exact (case-sensitive) substring matching over UTF-8 text; all
/// offsets are byte offsets. Returns the starting offset of the match, or
/// `None` if `anchor` is absent from `document[start_offset..]`. No side
/// effects.
///
/// # Errors
///
/// - [`SpliceError::EmptyAnchor`] if `anchor` is empty — rejected before any
///   search, since an empty needle would match everywhere.
/// - [`SpliceError::InvalidOffset`] if `start_offset` is past the end of the
///   document or not on a character boundary.
///
/// # Example
///
/// ```
/// # use apatch::locate;
/// let doc = "fn main() {\n    fn helper() {}\n}\n";
/// assert_eq!(locate(doc, "fn ", 0).unwrap(), Some(0));
/// assert_eq!(locate(doc, "fn ", 1).unwrap(), Some(16));
/// assert_eq!(locate(doc, "struct", 0).unwrap(), None);
/// ```
pub fn locate(
    document: &str,
    anchor: &str,
    start_offset: usize,
) -> Result<Option<usize>, SpliceError> {
    if anchor.is_empty() {
        return Err(SpliceError::EmptyAnchor);
    }
    let tail = document
        .get(start_offset..)
        .ok_or(SpliceError::InvalidOffset(start_offset))?;
    Ok(tail.find(anchor).map(|i| start_offset + i))
}

/// Finds the `n`-th occurrence (1-indexed) of `anchor` at or after
/// `start_offset`.
///
/// Occurrences are counted strictly left-to-right and non-overlapping: the
/// search for each subsequent occurrence begins just past the previous
/// match's *end*, not one character past its start. Returns `None` if fewer
/// than `n` occurrences exist.
///
/// # Errors
///
/// As [`locate`], plus [`SpliceError::ZeroOccurrence`] if `n` is zero.
///
/// # Example
///
/// ```
/// # use apatch::locate_nth;
/// assert_eq!(locate_nth("xx", "x", 1, 0).unwrap(), Some(0));
/// assert_eq!(locate_nth("xx", "x", 2, 0).unwrap(), Some(1));
/// assert_eq!(locate_nth("xx", "x", 3, 0).unwrap(), None);
///
/// // Non-overlapping: in "aaa" there is only one full match of "aa".
/// assert_eq!(locate_nth("aaa", "aa", 2, 0).unwrap(), None);
/// ```
pub fn locate_nth(
    document: &str,
    anchor: &str,
    n: usize,
    start_offset: usize,
) -> Result<Option<usize>, SpliceError> {
    if n == 0 {
        return Err(SpliceError::ZeroOccurrence);
    }
    let mut cursor = start_offset;
    let mut found = None;
    for _ in 0..n {
        match locate(document, anchor, cursor)? {
            Some(offset) => {
                found = Some(offset);
                cursor = offset + anchor.len();
            }
            None => return Ok(None),
        }
    }
    Ok(found)
}

/// Computes the 1-based line number that `offset` falls on.
fn line_of(document: &str, offset: usize) -> usize {
    document[..offset].bytes().filter(|&b| b == b'\n').count() + 1
}

/// A trait for strategies that find the span a splice edit should replace.
///
/// This allows the scope-then-Nth-occurrence search to be swapped out — for
/// example for a structural strategy keyed on a unique marker token — without
/// touching the splice machinery. Occurrence counting breaks silently when
/// the duplicated text it counts on stops being duplicated, so the seam
/// matters.
pub trait EditLocator {
    /// Finds the span `edit` should replace in `document`.
    ///
    /// # Returns
    ///
    /// - `Ok(SpliceLocation)` when the span was found.
    /// - `Err(EditError::ScopeAnchorNotFound)` /
    ///   `Err(EditError::TargetAnchorNotFound)` when an anchor is absent — a
    ///   reportable miss, not a hard error.
    /// - `Err(EditError::InvalidEdit)` when the edit violates the core
    ///   contract (empty anchor, zero occurrence).
    fn find_span(&self, document: &str, edit: &SpliceEdit) -> Result<SpliceLocation, EditError>;
}

/// The default, built-in location strategy: establish the scope lower bound
/// (when requested), then count occurrences left-to-right from there.
#[derive(Debug, Default)]
pub struct DefaultLocator;

impl EditLocator for DefaultLocator {
    fn find_span(&self, document: &str, edit: &SpliceEdit) -> Result<SpliceLocation, EditError> {
        let search_start = match &edit.scope {
            Some(scope) => {
                trace!("  Locating scope anchor ({} bytes)...", scope.len());
                match locate(document, scope, 0)? {
                    Some(offset) => offset,
                    None => return Err(EditError::ScopeAnchorNotFound),
                }
            }
            None => 0,
        };
        trace!(
            "  Searching for occurrence {} of target anchor from offset {}.",
            edit.occurrence,
            search_start
        );
        match locate_nth(document, &edit.anchor, edit.occurrence, search_start)? {
            Some(offset) => Ok(SpliceLocation {
                offset,
                line: line_of(document, offset),
                len: edit.anchor.len(),
            }),
            None => Err(EditError::TargetAnchorNotFound {
                occurrence: edit.occurrence,
            }),
        }
    }
}

/// Applies a single splice edit to a document, returning the new content or
/// an explicit miss.
///
/// The caller keeps the original document; on success a complete new document
/// is returned. On a miss nothing is produced — there is no
/// partial-application state.
///
/// On success, the returned content's length equals
/// `document.len() - anchor.len() + replacement.len()` and is byte-identical
/// to the original outside the spliced span.
///
/// # Errors
///
/// [`SpliceError`] for contract violations (empty anchor, zero occurrence),
/// detected before any search.
///
/// # Example
///
/// ```
/// # use apatch::{apply_splice, SpliceEdit, SpliceOutcome, MissingPolicy};
/// let doc = "a: Foo::default(),\nb: 1";
/// let edit = SpliceEdit {
///     scope: None,
///     anchor: "a: Foo::default(),".to_string(),
///     occurrence: 1,
///     replacement: "a: Bar::new(),".to_string(),
///     on_missing: MissingPolicy::Fail,
/// };
/// match apply_splice(doc, &edit).unwrap() {
///     SpliceOutcome::Applied { new_content, .. } => {
///         assert_eq!(new_content, "a: Bar::new(),\nb: 1");
///     }
///     SpliceOutcome::NotFound(reason) => panic!("unexpected miss: {}", reason),
/// }
/// ```
pub fn apply_splice(document: &str, edit: &SpliceEdit) -> Result<SpliceOutcome, SpliceError> {
    match DefaultLocator.find_span(document, edit) {
        Ok(location) => {
            debug!("  Found target anchor at {}.", location);
            Ok(SpliceOutcome::Applied {
                new_content: splice_at(document, location, &edit.replacement),
                location,
            })
        }
        Err(EditError::InvalidEdit(source)) => Err(source),
        Err(reason) => Ok(SpliceOutcome::NotFound(reason)),
    }
}

/// Rebuilds the document with `replacement` spliced over the located span.
fn splice_at(document: &str, location: SpliceLocation, replacement: &str) -> String {
    let mut new_content = String::with_capacity(document.len() - location.len + replacement.len());
    new_content.push_str(&document[..location.offset]);
    new_content.push_str(replacement);
    new_content.push_str(&document[location.offset + location.len..]);
    new_content
}

/// Resolves a conflict-marker region: replaces **all** verbatim occurrences
/// of `marker` with `replacement`.
///
/// Conflict-marker text is expected to appear at most once per logical
/// conflict, but the same literal marker sequence could recur; replacing all
/// occurrences keeps the operation idempotent — a second invocation after
/// success finds no more markers and returns [`ResolveOutcome::Unchanged`].
///
/// Absence of the marker is *not* an error (the conflict may already be
/// resolved), which is why this returns `Unchanged` rather than a miss.
///
/// # Errors
///
/// [`SpliceError::EmptyAnchor`] if `marker` is empty.
///
/// # Example
///
/// ```
/// # use apatch::{resolve_conflict, ResolveOutcome};
/// let doc = "<<<<<<< HEAD\nours\n=======\ntheirs\n>>>>>>> upstream/main\n";
/// let marker = "<<<<<<< HEAD\nours\n=======\ntheirs\n>>>>>>> upstream/main";
///
/// let new_content = match resolve_conflict(doc, marker, "ours\ntheirs").unwrap() {
///     ResolveOutcome::Resolved { new_content, occurrences } => {
///         assert_eq!(occurrences, 1);
///         new_content
///     }
///     ResolveOutcome::Unchanged => panic!("marker should have been found"),
/// };
/// assert_eq!(new_content, "ours\ntheirs\n");
///
/// // A second application is a no-op.
/// assert_eq!(
///     resolve_conflict(&new_content, marker, "ours\ntheirs").unwrap(),
///     ResolveOutcome::Unchanged
/// );
/// ```
pub fn resolve_conflict(
    document: &str,
    marker: &str,
    replacement: &str,
) -> Result<ResolveOutcome, SpliceError> {
    if marker.is_empty() {
        return Err(SpliceError::EmptyAnchor);
    }
    let occurrences = document.matches(marker).count();
    if occurrences == 0 {
        debug!("  Conflict marker not present; nothing to resolve.");
        return Ok(ResolveOutcome::Unchanged);
    }
    Ok(ResolveOutcome::Resolved {
        new_content: document.replace(marker, replacement),
        occurrences,
    })
}

/// An iterator that applies edits from a set one by one.
///
/// This struct provides fine-grained control over the application process. It
/// allows you to apply edits sequentially, inspect the intermediate document
/// between steps, and handle results on a per-edit basis. Each edit operates
/// on the output of the previous one: offsets into the original document are
/// meaningless once an earlier splice has changed its length.
///
/// The iterator yields an [`EditStatus`] for each edit in the set.
#[derive(Debug)]
pub struct EditApplier<'a> {
    edits: std::slice::Iter<'a, Edit>,
    current: String,
}

impl<'a> EditApplier<'a> {
    /// Creates a new `EditApplier` to begin a step-by-step patch operation.
    ///
    /// All edits are validated against the core contract up front, so the
    /// iterator itself is infallible.
    pub fn new(document: &str, edits: &'a [Edit]) -> Result<Self, SpliceError> {
        for edit in edits {
            edit.validate()?;
        }
        Ok(Self {
            edits: edits.iter(),
            current: document.to_string(),
        })
    }

    /// Returns the current document, reflecting all edits applied so far.
    pub fn current_content(&self) -> &str {
        &self.current
    }

    /// Consumes the applier and returns the final document.
    pub fn into_content(self) -> String {
        self.current
    }
}

impl Iterator for EditApplier<'_> {
    type Item = EditStatus;

    fn next(&mut self) -> Option<Self::Item> {
        let edit = self.edits.next()?;
        Some(apply_edit_in_place(edit, &mut self.current))
    }
}

/// Applies one validated edit to the evolving document.
fn apply_edit_in_place(edit: &Edit, document: &mut String) -> EditStatus {
    match edit {
        Edit::Splice(splice) => match DefaultLocator.find_span(document, splice) {
            Ok(location) => {
                *document = splice_at(document, location, &splice.replacement);
                EditStatus::Applied { location }
            }
            // Contract violations never follow the miss policy.
            Err(reason @ EditError::InvalidEdit(_)) => EditStatus::Failed(reason),
            Err(reason) => match splice.on_missing {
                MissingPolicy::Skip => EditStatus::SkippedMissing(reason),
                MissingPolicy::Fail => EditStatus::Failed(reason),
            },
        },
        Edit::Resolve(resolve) => {
            let occurrences = document.matches(resolve.marker.as_str()).count();
            if occurrences == 0 {
                return EditStatus::AlreadyResolved;
            }
            *document = document.replace(&resolve.marker, &resolve.replacement);
            EditStatus::Resolved { occurrences }
        }
    }
}

/// Applies an ordered sequence of edits to a document in memory.
///
/// This is a pure function: it takes the original content as a string and
/// returns the transformed content together with a per-edit report. It does
/// not interact with the filesystem, which makes it useful for testing and
/// for integrating `apatch`'s logic into other tools.
///
/// Edits are applied strictly in order, each consuming the previous edit's
/// output. A failed edit leaves the document as the previous edit produced it
/// and later edits are still attempted.
///
/// # Errors
///
/// [`SpliceError`] if any edit violates the core contract; rejected eagerly,
/// before any search runs.
///
/// # Example
///
/// ````rust
/// # use apatch::{parse_edits, apply_edits};
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let script = r#"
/// ```splice
/// file: greeting.txt
/// <<< match
/// Hello, world!
/// === replace
/// Hello, apatch!
/// >>>
/// ```
/// "#;
/// let sets = parse_edits(script)?;
/// let result = apply_edits("Hello, world!\n", &sets[0].edits)?;
/// assert_eq!(result.new_content, "Hello, apatch!\n");
/// assert!(result.report.all_applied_cleanly());
/// # Ok(())
/// # }
/// ````
pub fn apply_edits(document: &str, edits: &[Edit]) -> Result<InMemoryResult, SpliceError> {
    trace!(
        "  apply_edits called with {} bytes of original content.",
        document.len()
    );

    let mut applier = EditApplier::new(document, edits)?;
    let total_edits = edits.len();

    // Drive the iterator to completion, logging progress along the way.
    let edit_results: Vec<_> = applier
        .by_ref()
        .enumerate()
        .map(|(i, status)| {
            let edit_index = i + 1;
            info!("  Applying edit {}/{}...", edit_index, total_edits);
            match &status {
                EditStatus::Failed(reason) => {
                    warn!("  Failed to apply edit {}. {}", edit_index, reason);
                }
                EditStatus::SkippedMissing(reason) => {
                    info!("  Skipped edit {} ({}).", edit_index, reason);
                }
                _ => {}
            }
            status
        })
        .collect();

    let new_content = applier.into_content();

    Ok(InMemoryResult {
        new_content,
        report: ApplyReport { edit_results },
    })
}

// --- File Boundary ---

/// Converts a `std::io::Error` into a more specific `PatchError`.
fn map_io_error(path: PathBuf, e: std::io::Error) -> PatchError {
    match e.kind() {
        std::io::ErrorKind::PermissionDenied => PatchError::PermissionDenied { path },
        std::io::ErrorKind::IsADirectory => PatchError::TargetIsDirectory { path },
        _ => PatchError::Io { path, source: e },
    }
}

/// Ensures a relative path, when joined to a base directory, resolves to a
/// location that is still inside that base directory.
///
/// This is a critical security function to prevent path traversal attacks
/// (e.g., a malicious script targeting `../../etc/passwd`). It canonicalizes
/// the base directory and the target's parent directory to their absolute,
/// symlink-resolved forms and then checks that the target is a child of the
/// base.
///
/// # Returns
///
/// - `Ok(PathBuf)`: The safe, canonicalized, absolute path of the target.
/// - `Err(PatchError::PathTraversal)`: If the path resolves outside `base_dir`.
/// - `Err(PatchError::TargetNotFound)`: If the target's directory does not
///   exist — this system never creates files, so a missing directory means a
///   missing target.
/// - `Err(PatchError::Io)`: If an I/O error occurs during canonicalization.
///
/// # Example
///
/// ```no_run
/// # use apatch::{ensure_path_is_safe, PatchError};
/// # use std::path::Path;
/// # use tempfile::tempdir;
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let dir = tempdir()?;
/// std::fs::write(dir.path().join("ok.txt"), "fine\n")?;
///
/// assert!(ensure_path_is_safe(dir.path(), Path::new("ok.txt")).is_ok());
///
/// let result = ensure_path_is_safe(dir.path(), Path::new("../secret.txt"));
/// assert!(matches!(result, Err(PatchError::PathTraversal(_))));
/// # Ok(())
/// # }
/// ```
pub fn ensure_path_is_safe(base_dir: &Path, relative_path: &Path) -> Result<PathBuf, PatchError> {
    trace!(
        "  Checking path safety for base '{}' and relative path '{}'",
        base_dir.display(),
        relative_path.display()
    );
    let base_path =
        fs::canonicalize(base_dir).map_err(|e| map_io_error(base_dir.to_path_buf(), e))?;
    let target_file_path = base_dir.join(relative_path);
    let parent = target_file_path.parent().unwrap_or(Path::new(""));
    let canonical_parent = match fs::canonicalize(parent) {
        Ok(p) => p,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            // No such directory, so the target file cannot exist either.
            return Err(PatchError::TargetNotFound(target_file_path));
        }
        Err(e) => return Err(map_io_error(parent.to_path_buf(), e)),
    };
    let final_path = canonical_parent.join(target_file_path.file_name().unwrap_or_default());
    if !final_path.starts_with(&base_path) {
        return Err(PatchError::PathTraversal(relative_path.to_path_buf()));
    }
    Ok(final_path)
}

/// A convenience function that applies a single [`PatchSet`] to the filesystem.
///
/// This function orchestrates the patching process for one file. It handles
/// filesystem interactions — reading and UTF-8-decoding the original file,
/// writing the new content — while delegating the edit logic to
/// [`apply_edits`]. The write is all-or-nothing per file: either the complete
/// new document is persisted or the file is left alone.
///
/// # Arguments
///
/// * `set` - The [`PatchSet`] to apply.
/// * `target_dir` - The base directory where the edits should be applied. The
///   `set.file_path` will be joined to this directory.
/// * `options` - Configuration for the patch operation, such as `dry_run`.
///
/// # Returns
///
/// - `Ok(PatchResult)` on success. The `PatchResult` contains a detailed
///   report for each edit and, if `dry_run` was enabled, a diff of the
///   proposed changes. If some edits failed, the file may hold the partially
///   edited document (unless in dry-run mode) — the report says which edits
///   landed.
/// - `Err(PatchError)` for "hard" errors: I/O problems, path traversal, a
///   missing or non-UTF-8 target file.
///
/// # Example
///
/// ````
/// # use apatch::{parse_edits, apply_patch_set_to_file, ApplyOptions};
/// # use std::fs;
/// # use tempfile::tempdir;
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let dir = tempdir()?;
/// fs::write(dir.path().join("hello.txt"), "Hello, world!\n")?;
///
/// let script = r#"
/// ```splice
/// file: hello.txt
/// <<< match
/// Hello, world!
/// === replace
/// Hello, apatch!
/// >>>
/// ```
/// "#;
/// let sets = parse_edits(script)?;
/// let result = apply_patch_set_to_file(&sets[0], dir.path(), ApplyOptions::default())?;
///
/// assert!(result.report.all_applied_cleanly());
/// assert_eq!(fs::read_to_string(dir.path().join("hello.txt"))?, "Hello, apatch!\n");
/// # Ok(())
/// # }
/// ````
pub fn apply_patch_set_to_file(
    set: &PatchSet,
    target_dir: &Path,
    options: ApplyOptions,
) -> Result<PatchResult, PatchError> {
    info!("Applying edits to: {}", set.file_path.display());

    // --- Path Safety Check ---
    // `ensure_path_is_safe` returns a canonicalized, absolute path that is
    // confirmed to be inside the target_dir.
    let safe_target_path = ensure_path_is_safe(target_dir, &set.file_path)?;
    trace!("    Path is safe.");

    // --- Read Original File ---
    // All subsequent operations use the verified `safe_target_path`.
    if safe_target_path.is_dir() {
        return Err(PatchError::TargetIsDirectory {
            path: safe_target_path,
        });
    }
    if !safe_target_path.is_file() {
        // For user-facing errors, show the original path, not the canonicalized one.
        return Err(PatchError::TargetNotFound(target_dir.join(&set.file_path)));
    }

    trace!("  Reading target file '{}'", set.file_path.display());
    let bytes =
        fs::read(&safe_target_path).map_err(|e| map_io_error(safe_target_path.clone(), e))?;
    let original_content = String::from_utf8(bytes).map_err(|_| PatchError::Encoding {
        path: safe_target_path.clone(),
    })?;
    trace!("  Read {} bytes from target file.", original_content.len());

    // --- Apply Edits to Content ---
    let result =
        apply_edits(&original_content, &set.edits).map_err(|source| PatchError::InvalidEdit {
            path: set.file_path.clone(),
            source,
        })?;
    let new_content = result.new_content;
    let report = result.report;

    let mut diff = None;
    if options.dry_run {
        // In dry-run mode, generate a diff instead of writing to the file.
        info!(
            "  DRY RUN: Would write changes to '{}'",
            set.file_path.display()
        );
        let diff_text = unified_diff(
            similar::Algorithm::default(),
            &original_content,
            &new_content,
            3,
            Some(("a", "b")),
        );
        diff = Some(diff_text.to_string());
    } else if new_content == original_content {
        // All edits skipped or already resolved; don't touch the file.
        info!(
            "  No changes for '{}'; file left untouched.",
            set.file_path.display()
        );
    } else {
        fs::write(&safe_target_path, &new_content)
            .map_err(|e| map_io_error(safe_target_path.clone(), e))?;
        if report.all_applied_cleanly() {
            info!(
                "  Successfully wrote changes to '{}'",
                set.file_path.display()
            );
        } else {
            warn!("  Wrote partial changes to '{}'", set.file_path.display());
        }
    }

    Ok(PatchResult { report, diff })
}

/// Applies a slice of [`PatchSet`] objects to a target directory.
///
/// This is a high-level convenience function that applies each set to the
/// filesystem using [`apply_patch_set_to_file`] and aggregates the results,
/// including both successful applications and any "hard" errors encountered
/// (like I/O errors). It continues applying sets even if some fail.
///
/// Edit sets target distinct files and are independent of one another, so
/// with the `parallel` feature enabled they are applied on the rayon thread
/// pool. The edits *within* each set remain strictly ordered.
pub fn apply_patch_sets_to_dir(
    sets: &[PatchSet],
    target_dir: &Path,
    options: ApplyOptions,
) -> BatchResult {
    #[cfg(feature = "parallel")]
    let iter = sets.par_iter();
    #[cfg(not(feature = "parallel"))]
    let iter = sets.iter();

    let results = iter
        .map(|set| {
            let result = apply_patch_set_to_file(set, target_dir, options);
            (set.file_path.clone(), result)
        })
        .collect();

    BatchResult { results }
}
