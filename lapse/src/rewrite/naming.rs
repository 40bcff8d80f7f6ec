//! Qualified method identities
//!
//! Every measurement is keyed by a compact, human-readable identity string
//! built at rewrite time and passed to the hooks as a constant:
//!
//! ```text
//! com.example.service.OrderService.lookup(java.lang.String, int)
//!   → c.e.s.OrderService.lookup(j.l.String, int)
//! ```
//!
//! Package segments shrink to their first character; simple names, primitive
//! names and array brackets are kept.

use lapse_common::IMPL_SUFFIX;

/// Shorten a dotted type name: `java.lang.String[]` → `j.l.String[]`
pub fn abbreviate(type_name: &str) -> String {
    let Some((package, simple)) = type_name.rsplit_once('.') else {
        return type_name.to_string();
    };
    let mut out = String::with_capacity(type_name.len());
    for segment in package.split('.') {
        if let Some(first) = segment.chars().next() {
            out.push(first);
            out.push('.');
        }
    }
    out.push_str(simple);
    out
}

/// `abbrev(class).method(abbrev(p1), abbrev(p2), ...)`
pub fn qualified_identity<S: AsRef<str>>(class_name: &str, method_name: &str, param_type_names: &[S]) -> String {
    let params: Vec<String> = param_type_names.iter().map(|p| abbreviate(p.as_ref())).collect();
    format!("{}.{}({})", abbreviate(class_name), method_name, params.join(", "))
}

/// Name the original body is moved to
pub fn impl_name(method_name: &str) -> String {
    format!("{method_name}{IMPL_SUFFIX}")
}
