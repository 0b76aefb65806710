use clap::{ Parser, Subcommand };

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Command>,

    // --- Chat LLM Provider Args ---
    /// Type of LLM provider for chat completion (gemini, ollama, echo)
    #[arg(long, env = "CHAT_LLM_TYPE", default_value = "gemini")]
    pub chat_llm_type: String,

    /// Base URL for the Chat LLM provider API (e.g., http://localhost:11434 for Ollama)
    #[arg(long, env = "CHAT_BASE_URL")] // No default, let adapters handle defaults if None
    pub chat_base_url: Option<String>,

    /// API Key for the Chat LLM provider (required for Gemini)
    #[arg(long, env = "CHAT_API_KEY", default_value = "", hide_env_values = true)]
    pub chat_api_key: String,

    /// Model name for chat completion (e.g., gemini-2.5-flash, llama3.2)
    #[arg(long, env = "CHAT_MODEL")] // No default, rely on adapter defaults if None
    pub chat_model: Option<String>,

    // --- Session Args ---
    /// Prompt used when a request arrives without one.
    #[arg(long, env = "DEFAULT_PROMPT", default_value = "Say hello!")]
    pub default_prompt: String,

    /// How the prompt is sent upstream: verbatim, or formatted with the markdown instruction template.
    #[arg(long, env = "PROMPT_STYLE", default_value = "verbatim")]
    pub prompt_style: String,

    /// Optional file replacing the built-in formatting template. Must contain {prompt}.
    #[arg(long, env = "PROMPT_TEMPLATE_PATH")]
    pub prompt_template_path: Option<String>,

    // --- General App Args ---
    /// Enable debug logging/output
    #[arg(long, env = "DEBUG", default_value = "false")]
    pub debug: bool,

    /// Host address and port for the server to listen on.
    #[arg(long, env = "SERVER_ADDR", default_value = "127.0.0.1:4000")]
    pub server_addr: String,

    /// Optional path to the TLS certificate file (PEM format) for enabling HTTPS. Requires --tls-key-path.
    #[arg(long, env = "TLS_CERT_PATH")]
    pub tls_cert_path: Option<String>,

    /// Optional path to the TLS private key file (PEM format) for enabling HTTPS. Requires --tls-cert-path.
    #[arg(long, env = "TLS_KEY_PATH")]
    pub tls_key_path: Option<String>,

    #[arg(long, env = "ENABLE_TLS", default_value = "false")]
    pub enable_tls: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run the streaming session server (default).
    Serve,
    /// Chat with a running server from the terminal.
    Chat {
        /// Base URL of the session server.
        #[arg(long, env = "CHAT_SERVER_URL", default_value = "http://127.0.0.1:4000")]
        url: String,
    },
}
