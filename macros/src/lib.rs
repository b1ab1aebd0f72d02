//! Procedural macros shared by the lfsview test suites.
//!
//! The expanded code refers to `::tracing` and `::tracing_subscriber`, so any crate using
//! [macro@test_traced] must list both as (dev-)dependencies.

use proc_macro::TokenStream;
use proc_macro2::{Ident, Span};
use quote::quote;
use syn::{parse_macro_input, Error, ItemFn, LitStr};

/// Levels accepted by [macro@test_traced].
const LEVELS: [&str; 5] = ["TRACE", "DEBUG", "INFO", "WARN", "ERROR"];

/// Run a test function with a `tracing` subscriber that writes to the test harness.
///
/// The subscriber logs at `DEBUG` unless a level is provided as a string literal.
///
/// # Example
///
/// ```rust,ignore
/// use lfsview_macros::test_traced;
///
/// #[test_traced("INFO")]
/// fn test_reads() {
///     tracing::info!("visible");
///     tracing::debug!("filtered");
/// }
/// ```
#[proc_macro_attribute]
pub fn test_traced(attr: TokenStream, item: TokenStream) -> TokenStream {
    let input = parse_macro_input!(item as ItemFn);

    // Determine the level
    let level = if attr.is_empty() {
        String::from("DEBUG")
    } else {
        let literal = parse_macro_input!(attr as LitStr);
        let level = literal.value().to_uppercase();
        if !LEVELS.contains(&level.as_str()) {
            return Error::new(
                literal.span(),
                format!("invalid log level `{}`, expected one of {:?}", literal.value(), LEVELS),
            )
            .to_compile_error()
            .into();
        }
        level
    };
    let level = Ident::new(&level, Span::call_site());

    // Only synchronous tests are supported (async bodies drive their own executor)
    if let Some(asyncness) = &input.sig.asyncness {
        return Error::new_spanned(asyncness, "test_traced does not support async functions")
            .to_compile_error()
            .into();
    }

    let attrs = &input.attrs;
    let vis = &input.vis;
    let name = &input.sig.ident;
    let output = &input.sig.output;
    let body = &input.block;
    let expanded = quote! {
        #[test]
        #(#attrs)*
        #vis fn #name() #output {
            let subscriber = ::tracing_subscriber::fmt()
                .with_test_writer()
                .with_max_level(::tracing::Level::#level)
                .with_line_number(true)
                .with_span_events(::tracing_subscriber::fmt::format::FmtSpan::CLOSE)
                .finish();
            let dispatcher = ::tracing::Dispatch::new(subscriber);
            ::tracing::dispatcher::with_default(&dispatcher, || #body)
        }
    };
    TokenStream::from(expanded)
}
