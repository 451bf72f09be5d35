use anyhow::Result;
use cliclack::input;
use console::style;
use futures::StreamExt;
use std::io::{self, Write};
use std::sync::Arc;

use modelgate::config::Settings;
use modelgate::gateway::{Gateway, GatewayRequest};
use modelgate::models::message::Message;
use modelgate::providers::base::GenerationParams;
use modelgate::router::ProviderRegistry;
use modelgate::sandbox::ToolRegistry;

use crate::tools;

pub struct ChatOptions {
    pub model: String,
    pub system: Option<String>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
    pub tools: bool,
}

struct Session {
    gateway: Gateway,
    options: ChatOptions,
    tools: ToolRegistry,
    params: GenerationParams,
    history: Vec<Message>,
}

pub async fn execute(
    settings: &Settings,
    options: ChatOptions,
    prompt: Option<String>,
) -> Result<()> {
    let registry = Arc::new(ProviderRegistry::from_settings(settings)?);
    let mut session = Session {
        gateway: Gateway::new(registry, settings.gateway.gateway_config()),
        tools: if options.tools {
            tools::builtin_tools()
        } else {
            ToolRegistry::new()
        },
        params: GenerationParams {
            temperature: options.temperature,
            max_tokens: options.max_tokens,
            ..Default::default()
        },
        options,
        history: Vec::new(),
    };

    if let Some(prompt) = prompt {
        return session.send(prompt).await;
    }

    println!(
        "modelgate chat with {} {}",
        style(&session.options.model).bold(),
        style("- type \"exit\" to end the session").dim()
    );
    loop {
        let message: String = input("Message:").placeholder("").multiline().interact()?;
        if message.trim().eq_ignore_ascii_case("exit") {
            break;
        }
        if let Err(err) = session.send(message).await {
            tracing::debug!("turn failed: {:?}", err);
        }
        println!();
    }
    Ok(())
}

impl Session {
    /// Run one turn and keep its answer in the history
    async fn send(&mut self, text: String) -> Result<()> {
        self.history.push(Message::user().with_text(text));

        let mut request = GatewayRequest::new(self.options.model.as_str(), self.history.clone())
            .with_tools(self.tools.clone())
            .with_params(self.params.clone());
        if let Some(system) = &self.options.system {
            request = request.with_system(system.as_str());
        }

        let mut answer = String::new();
        let mut stdout = io::stdout();
        let mut stream = self.gateway.reply(request);
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(text) => {
                    print!("{}", text);
                    stdout.flush()?;
                    answer.push_str(&text);
                }
                Err(err) => {
                    eprintln!("{}", style(&err).red());
                    if let Some(hint) = err.hint() {
                        eprintln!("{}", style(hint).dim());
                    }
                    // the unanswered prompt is not kept
                    self.history.pop();
                    return Err(err.into());
                }
            }
        }
        println!();

        self.history.push(Message::assistant().with_text(answer));
        Ok(())
    }
}
