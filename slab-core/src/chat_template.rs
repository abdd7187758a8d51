//! Chat-template renderer. A null/blank template falls
//! back to a ChatML-style format.

use crate::types::Message;

/// Render `messages` through `template` (a minijinja template source), or
/// the mandated ChatML fallback when `template` is `None`/blank.
pub fn render(template: Option<&str>, messages: &[Message]) -> String {
    match template {
        Some(src) if !src.trim().is_empty() => render_minijinja(src, messages)
            .unwrap_or_else(|err| {
                tracing::warn!(error = %err, "chat template render failed, falling back to ChatML");
                render_chatml(messages)
            }),
        _ => render_chatml(messages),
    }
}

fn render_minijinja(src: &str, messages: &[Message]) -> Result<String, minijinja::Error> {
    let mut env = minijinja::Environment::new();
    env.add_template("chat", src)?;
    let tmpl = env.get_template("chat")?;
    let ctx: Vec<_> = messages
        .iter()
        .map(|m| {
            minijinja::context! {
                role => role_str(m.role),
                content => m.content,
            }
        })
        .collect();
    tmpl.render(minijinja::context! { messages => ctx })
}

fn role_str(role: crate::types::Role) -> &'static str {
    use crate::types::Role::*;
    match role {
        System => "system",
        User => "user",
        Assistant => "assistant",
        Tool => "tool",
    }
}

/// `<|im_start|>{role}\n{content}<|im_end|>\n` per message, then
/// `<|im_start|>assistant\n`.
fn render_chatml(messages: &[Message]) -> String {
    let mut out = String::new();
    for m in messages {
        out.push_str("<|im_start|>");
        out.push_str(role_str(m.role));
        out.push('\n');
        out.push_str(&m.content);
        out.push_str("<|im_end|>\n");
    }
    out.push_str("<|im_start|>assistant\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Role;

    fn msgs() -> Vec<Message> {
        vec![
            Message {
                role: Role::System,
                content: "be terse".to_string(),
            },
            Message {
                role: Role::User,
                content: "hi".to_string(),
            },
        ]
    }

    #[test]
    fn blank_template_falls_back_to_chatml() {
        let rendered = render(None, &msgs());
        assert!(rendered.starts_with("<|im_start|>system\nbe terse<|im_end|>\n"));
        assert!(rendered.ends_with("<|im_start|>assistant\n"));

        let rendered_blank = render(Some("   "), &msgs());
        assert_eq!(rendered, rendered_blank);
    }

    #[test]
    fn custom_template_is_used() {
        let tmpl = "{% for m in messages %}[{{ m.role }}] {{ m.content }}\n{% endfor %}";
        let rendered = render(Some(tmpl), &msgs());
        assert_eq!(rendered, "[system] be terse\n[user] hi\n");
    }
}
