use std::sync::Arc;

/// Lazily evaluated macro value.
pub type MacroFn = Arc<dyn Fn() -> String + Send + Sync>;

/// Host registry for `{{name}}` prompt macros.
pub trait MacroRegistrar: Send + Sync {
    fn register_macro(&self, name: &str, value: MacroFn);
}

/// Description of a slash command exposed to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlashCommandSpec {
    pub name: &'static str,
    pub aliases: Vec<&'static str>,
    pub help: &'static str,
}

/// Host registry for slash commands. Invocations are routed back to the
/// timeline's command dispatcher by name.
pub trait CommandRegistrar: Send + Sync {
    fn register_command(&self, spec: SlashCommandSpec);
}
