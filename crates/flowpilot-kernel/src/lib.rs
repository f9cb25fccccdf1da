//! FlowPilot kernel.
//!
//! The leaf crate of the FlowPilot workspace.  It owns the data-driven
//! pieces every other crate reads:
//!
//! - **[`locale`]** -- Locale pattern store: per-locale scenario configuration
//!   and intent keyword tables, replaced wholesale on reload.
//! - **[`matcher`]** -- Aggregated query-keyword matcher built on
//!   [`aho_corasick`] and chunked word-boundary [`regex`] alternations.
//! - **[`trigger`]** -- Tool trigger detector for slash commands and
//!   "use <tool> for id X" instructions.
//! - **[`watch`]** -- Optional hot reload of locale files via [`notify`].
//! - **[`error`]** -- Unified kernel error types via [`thiserror`].
//!
//! All public types are `Send + Sync`.

pub mod error;
pub mod locale;
pub mod matcher;
pub mod trigger;
pub mod watch;

// Re-export the most commonly used types at the crate root for convenience.
pub use error::{KernelError, Result};
pub use locale::{
    DirectorySource, GENERAL_SCENARIO, IntentKeywords, KeywordRoute, LocaleConfig,
    LocaleIntents, LocaleSnapshot, LocaleSource, LocaleStore, RoutedPrompt, ScenarioConfig,
    StaticSource, WeightedPattern,
};
pub use matcher::{QueryMatcher, contains_word, normalize};
pub use trigger::{ToolTriggerDetector, TriggerResult};
pub use watch::LocaleWatcher;
