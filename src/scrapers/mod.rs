//! Page analysis and URL-only inference.
//!
//! None of these modules touch the network on their own. The two page
//! analyzers work on an already-rendered [`scraper::Html`] document, and
//! URL-only inference needs only the URL string (plus, optionally, a local
//! model).
//!
//! | Module | Input | Output |
//! |--------|-------|--------|
//! | [`structured`] | rendered document | JSON-LD blocks, paragraph text, field hints |
//! | [`reducer`] | rendered document | main content region within a character budget |
//! | [`url_only`] | URL string | a record holding only values present in the URL |

pub mod reducer;
pub mod structured;
pub mod url_only;
