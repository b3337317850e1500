//! Inert LLM prompt templates. LLM providers (query rewriting, result
//! summarization) are an external collaborator; this module supplies only
//! the template text and a placeholder-substitution helper, never an HTTP
//! client or a model invocation.

pub const QUERY_REWRITE_TEMPLATE: &str = "\
Rewrite the following search query to improve recall against a hybrid \
full-text and vector search index. Keep it concise and preserve the \
user's intent.

Query: {query}
";

pub const RESULT_SUMMARY_TEMPLATE: &str = "\
Summarize the following search results in relation to the query below. \
Cite result ids where relevant.

Query: {query}
Results:
{results}
";

/// Substitutes `{name}` placeholders in `template` with the matching
/// entry from `vars`, leaving any placeholder with no matching var intact.
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (name, value) in vars {
        out = out.replace(&format!("{{{name}}}"), value);
    }
    out
}
