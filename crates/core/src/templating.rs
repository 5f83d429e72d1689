use serde::{Deserialize, Serialize};

use crate::domain::quote::QuoteId;
use crate::domain::variable::VariableSet;

pub const QUOTE_ID_TOKEN: &str = ":quoteId";

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionContext {
    #[serde(default)]
    pub quote_id: Option<QuoteId>,
}

impl ResolutionContext {
    pub fn for_quote(quote_id: QuoteId) -> Self {
        Self { quote_id: Some(quote_id) }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedMessage {
    pub text: String,
    /// Tokens left verbatim, in order of first appearance.
    pub unresolved: Vec<String>,
}

/// Substitutes `{{name}}` placeholders and the `:quoteId` token.
///
/// The message is scanned once from left to right. Substituted values are
/// emitted as-is and never rescanned, so the output does not depend on
/// dictionary order. Unknown tokens stay in the text unchanged.
#[derive(Clone, Copy, Debug, Default)]
pub struct TemplateVariableResolver;

impl TemplateVariableResolver {
    pub fn resolve(
        &self,
        message: &str,
        variables: &VariableSet,
        context: ResolutionContext,
    ) -> String {
        scan(message, variables, context, &mut Vec::new())
    }

    pub fn resolve_detailed(
        &self,
        message: &str,
        variables: &VariableSet,
        context: ResolutionContext,
    ) -> ResolvedMessage {
        let mut unresolved = Vec::new();
        let text = scan(message, variables, context, &mut unresolved);
        ResolvedMessage { text, unresolved }
    }

    pub fn unresolved_tokens(
        &self,
        message: &str,
        variables: &VariableSet,
        context: ResolutionContext,
    ) -> Vec<String> {
        self.resolve_detailed(message, variables, context).unresolved
    }
}

fn scan(
    message: &str,
    variables: &VariableSet,
    context: ResolutionContext,
    unresolved: &mut Vec<String>,
) -> String {
    let mut output = String::with_capacity(message.len());
    let mut rest = message;

    while let Some(ch) = rest.chars().next() {
        if rest.starts_with(OPEN) {
            let Some(close) = rest[OPEN.len()..].find(CLOSE) else {
                output.push_str(rest);
                break;
            };
            let name = &rest[OPEN.len()..OPEN.len() + close];
            let token_len = OPEN.len() + close + CLOSE.len();

            // `{{a {{b}}`: the real token starts further right.
            if name.contains(OPEN) {
                output.push(ch);
                rest = &rest[ch.len_utf8()..];
                continue;
            }

            match variables.get(name) {
                Some(value) => output.push_str(value),
                None => {
                    let token = &rest[..token_len];
                    note_unresolved(unresolved, token);
                    output.push_str(token);
                }
            }
            rest = &rest[token_len..];
            continue;
        }

        if rest.starts_with(QUOTE_ID_TOKEN) {
            match context.quote_id {
                Some(quote_id) => output.push_str(&quote_id.to_string()),
                None => {
                    note_unresolved(unresolved, QUOTE_ID_TOKEN);
                    output.push_str(QUOTE_ID_TOKEN);
                }
            }
            rest = &rest[QUOTE_ID_TOKEN.len()..];
            continue;
        }

        output.push(ch);
        rest = &rest[ch.len_utf8()..];
    }

    output
}

fn note_unresolved(unresolved: &mut Vec<String>, token: &str) {
    if !unresolved.iter().any(|seen| seen == token) {
        unresolved.push(token.to_owned());
    }
}

#[cfg(test)]
mod tests {
    use super::{ResolutionContext, TemplateVariableResolver};
    use crate::domain::quote::QuoteId;
    use crate::domain::variable::VariableSet;

    fn john() -> VariableSet {
        VariableSet::new().with("name", "John")
    }

    #[test]
    fn replaces_every_occurrence_of_a_known_token() {
        let text = TemplateVariableResolver.resolve(
            "Hi {{name}}, thanks {{name}}!",
            &john(),
            ResolutionContext::default(),
        );
        assert_eq!(text, "Hi John, thanks John!");
    }

    #[test]
    fn unknown_tokens_are_left_verbatim_and_reported() {
        let resolved = TemplateVariableResolver.resolve_detailed(
            "Hi {{name}} from {{company}} and {{company}}",
            &john(),
            ResolutionContext::default(),
        );
        assert_eq!(resolved.text, "Hi John from {{company}} and {{company}}");
        assert_eq!(resolved.unresolved, vec!["{{company}}".to_owned()]);
    }

    #[test]
    fn quote_id_token_needs_a_quote_in_context() {
        let message = "See https://example.test/q/:quoteId";
        let resolver = TemplateVariableResolver;

        let context = ResolutionContext::for_quote(QuoteId(77));
        let with_id = resolver.resolve(message, &VariableSet::new(), context);
        assert_eq!(with_id, "See https://example.test/q/77");

        let without = resolver.unresolved_tokens(
            message,
            &VariableSet::new(),
            ResolutionContext::default(),
        );
        assert_eq!(without, vec![":quoteId".to_owned()]);
    }

    #[test]
    fn substituted_values_are_not_rescanned() {
        let variables = VariableSet::new().with("a", "{{b}}").with("b", "boom");
        let context = ResolutionContext::default();
        let text = TemplateVariableResolver.resolve("{{a}} {{b}}", &variables, context);
        assert_eq!(text, "{{b}} boom");
    }

    #[test]
    fn stray_braces_do_not_hide_a_later_token() {
        let text = TemplateVariableResolver.resolve(
            "{{oops {{name}} and {{unterminated",
            &john(),
            ResolutionContext::default(),
        );
        assert_eq!(text, "{{oops John and {{unterminated");
    }

    #[test]
    fn resolving_twice_changes_nothing() {
        let resolver = TemplateVariableResolver;
        let context = ResolutionContext::for_quote(QuoteId(5));
        let once = resolver.resolve("Ciao {{name}} ✓ :quoteId {{x}}", &john(), context);
        let twice = resolver.resolve(&once, &john(), context);
        assert_eq!(once, "Ciao John ✓ 5 {{x}}");
        assert_eq!(once, twice);
    }
}
