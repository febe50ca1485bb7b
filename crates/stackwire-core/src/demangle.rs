//! Symbol demangling.
//!
//! Rust symbols (legacy `_ZN...E` and v0 `_R...`) are demangled with
//! `rustc-demangle`. Anything else is returned unchanged by
//! [`display_name`].
//!
//! Demangling allocates: call it when writing symbolized captures or when
//! printing a report, never from a signal handler.

use std::borrow::Cow;

use rustc_demangle::try_demangle;

/// Demangle `mangled`, or `None` if it is not a Rust symbol.
///
/// The trailing hash is dropped (`foo::bar::h0123456789abcdef` becomes
/// `foo::bar`).
///
/// ## Example
///
/// ```rust
/// use stackwire_core::demangle::demangle;
///
/// assert_eq!(demangle("_ZN4core3ptr13drop_in_place17h1234567890abcdefE").as_deref(), Some("core::ptr::drop_in_place"));
/// assert_eq!(demangle("main"), None);
/// ```
#[must_use]
pub fn demangle(mangled: &str) -> Option<String>
{
    try_demangle(mangled).ok().map(|symbol| format!("{symbol:#}"))
}

/// Shown for frames that carry no symbol
pub const UNKNOWN_SYMBOL: &str = "<unknown>";

/// Printable name for a symbol read from a stream
///
/// Invalid UTF-8 is replaced; unmangled names are borrowed as-is. An empty
/// symbol becomes [`UNKNOWN_SYMBOL`].
#[must_use]
pub fn display_name(raw: &[u8]) -> Cow<'_, str>
{
    if raw.is_empty() {
        return Cow::Borrowed(UNKNOWN_SYMBOL);
    }
    let text = String::from_utf8_lossy(raw);
    match demangle(&text) {
        Some(demangled) => Cow::Owned(demangled),
        None => text,
    }
}
