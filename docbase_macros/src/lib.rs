mod document;

use proc_macro::TokenStream;

// ============================================================================
// #[derive(Document)] derive macro
// ============================================================================

/// Derive macro for the `Document` trait.
///
/// # Usage
///
/// ```ignore
/// #[derive(Debug, Clone, Serialize, Deserialize, Document)]
/// #[document(collection = "books", sortable("title", "page_count"), default_sort = "-page_count")]
/// struct Book {
///     id: Option<ObjectId>,
///     title: String,
///     #[serde(rename = "pageCount")]
///     page_count: u32,
/// }
/// ```
///
/// Struct-level options, all optional:
///
/// - `collection = "..."`: collection name. Defaults to the snake_case
///   struct name + "s".
/// - `name = "..."`: name used in not-found errors. Defaults to the struct
///   name.
/// - `timestamps`: maintain `created_at` / `updated_at`. The struct must
///   have both fields as `Option<bson::DateTime>`; `Timestamped` is
///   implemented as well.
/// - `defaults`: the struct implements `Default`, used when dumping with
///   `exclude_defaults`.
/// - `sortable("a", "b")`: implements `Sortable` with these fields.
/// - `default_sort = "-a,b"`: default order of the `Sortable` impl.
///
/// `#[document(id)]` marks the identifier field (an `Option<ObjectId>`).
/// If omitted, defaults to a field named `id`. `#[serde(rename)]` and
/// `#[serde(rename_all)]` become storage aliases.
#[proc_macro_derive(Document, attributes(document))]
pub fn derive_document(input: TokenStream) -> TokenStream {
    document::derive_document(input)
}
