pub mod models;
pub mod server;
pub mod stream;
pub mod config;
pub mod llm;
pub mod cli;
pub mod history;
pub mod client;

use cli::{ Args, Command };
use config::prompt::{ PromptPolicy, PromptStyle, load_template };
use llm::{ LlmConfig, LlmType };
use log::info;
use server::Server;
use std::error::Error;
use stream::{ SessionHandler, SessionSettings };

pub fn build_llm_config(args: &Args) -> Result<LlmConfig, Box<dyn Error + Send + Sync>> {
    let llm_type: LlmType = args.chat_llm_type
        .parse()
        .map_err(|e| format!("Invalid chat LLM type: {}", e))?;
    Ok(LlmConfig {
        llm_type,
        api_key: Some(args.chat_api_key.clone()).filter(|k| !k.is_empty()),
        completion_model: args.chat_model.clone(),
        base_url: args.chat_base_url.clone(),
    })
}

pub fn build_session_settings(args: &Args) -> Result<SessionSettings, Box<dyn Error + Send + Sync>> {
    let style: PromptStyle = args.prompt_style.parse()?;
    let mut policy = PromptPolicy::new(style);
    if let Some(path) = &args.prompt_template_path {
        policy = policy.with_template(load_template(path)?);
    }
    Ok(SessionSettings {
        default_prompt: args.default_prompt.clone(),
        prompt_policy: policy,
    })
}

pub async fn run(args: Args) -> Result<(), Box<dyn Error + Send + Sync>> {
    if let Some(Command::Chat { url }) = &args.command {
        client::shell::run_chat(url).await?;
        return Ok(());
    }

    let llm_config = build_llm_config(&args)?;
    let settings = build_session_settings(&args)?;

    info!("--- Core Configuration ---");
    info!("Server Address: {}", args.server_addr);
    info!("Chat LLM Type: {}", llm_config.llm_type);
    info!("Chat Model: {}", args.chat_model.as_deref().unwrap_or("(adapter default)"));
    info!("Chat Base URL: {}", args.chat_base_url.as_deref().unwrap_or("(adapter default)"));
    info!("Chat API Key Set: {}", llm_config.api_key.is_some());
    info!("Default Prompt: {}", settings.default_prompt);
    info!("Prompt Style: {}", settings.prompt_policy.style);
    info!("TLS Enabled: {}", args.enable_tls);
    info!("-------------------------");

    let handler = SessionHandler::new(llm_config, settings);
    let addr = args.server_addr.clone();
    let server = Server::new(addr, handler, args.clone());
    server.run().await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn empty_api_key_is_treated_as_missing() {
        let args = Args::parse_from(["stream-chat", "--chat-api-key", "", "--chat-llm-type", "echo"]);
        let config = build_llm_config(&args).expect("valid type");
        assert_eq!(config.llm_type, LlmType::Echo);
        assert!(config.api_key.is_none());
    }

    #[test]
    fn unknown_prompt_style_is_rejected() {
        let args = Args::parse_from(["stream-chat", "--prompt-style", "shouty"]);
        assert!(build_session_settings(&args).is_err());
    }
}
