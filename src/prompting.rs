use minijinja::{context, Environment};

const SYSTEM_PROMPT_TEMPLATE: &str = include_str!("prompts/system_prompt.j2");

pub struct SystemPromptContext<'a> {
    pub assistant_name: &'a str,
    pub language: &'a str,
    pub history_limit: usize,
    pub tool_names: &'a [&'a str],
}

/// The built-in system prompt, used until an admin stores a custom one.
pub fn render_system_prompt(ctx: &SystemPromptContext<'_>) -> String {
    let mut env = Environment::new();
    if env
        .add_template("system_prompt", SYSTEM_PROMPT_TEMPLATE)
        .is_err()
    {
        return fallback_system_prompt(ctx);
    }

    let Ok(template) = env.get_template("system_prompt") else {
        return fallback_system_prompt(ctx);
    };

    template
        .render(context! {
            assistant_name => assistant_name(ctx),
            language => language(ctx),
            history_limit => ctx.history_limit,
            tools => ctx.tool_names,
            has_tools => !ctx.tool_names.is_empty(),
        })
        .map(|rendered| rendered.trim().to_string())
        .unwrap_or_else(|_| fallback_system_prompt(ctx))
}

fn assistant_name<'a>(ctx: &SystemPromptContext<'a>) -> &'a str {
    if ctx.assistant_name.trim().is_empty() {
        "Support Bot"
    } else {
        ctx.assistant_name.trim()
    }
}

fn language<'a>(ctx: &SystemPromptContext<'a>) -> &'a str {
    if ctx.language.trim().is_empty() {
        "English"
    } else {
        ctx.language.trim()
    }
}

fn fallback_system_prompt(ctx: &SystemPromptContext<'_>) -> String {
    let mut prompt = format!(
        "You are {}, the customer-support assistant of this shop. Never invent facts.\n\
         Always answer in {} unless asked otherwise.\n",
        assistant_name(ctx),
        language(ctx),
    );
    if !ctx.tool_names.is_empty() {
        prompt.push_str("Available tools: ");
        prompt.push_str(&ctx.tool_names.join(", "));
        prompt.push('\n');
    }
    prompt
}
