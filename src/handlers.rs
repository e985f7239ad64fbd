use std::sync::Arc;

use teloxide::{prelude::*, types::ChatAction, types::Me};
use vault_agent::config::Config;
use vault_agent::intent::Intent;
use vault_agent::orchestrator::{build_messages, ConversationOrchestrator, TurnOutcome};
use vault_agent::pipeline::ContextSink;
use vault_agent::session::{JsonSessionStore, Session, SessionStore};

/// Telegram rejects messages longer than 4096 characters.
const MAX_MESSAGE_CHARS: usize = 4000;

/// Everything the handlers share, injected through dptree.
pub struct AppState {
    pub config: Config,
    pub orchestrator: ConversationOrchestrator,
    pub sessions: JsonSessionStore,
}

/// Handler for /start command
pub async fn start_handler(bot: Bot, msg: Message, me: Me) -> ResponseResult<()> {
    let text = format!(
        "👋 Ciao! Sono {}, il tuo assistente per il vault Obsidian.\n\n\
        Scrivimi cosa vuoi fare e lo farò direttamente sulle tue note.\n\n\
        Comandi disponibili:\n\
        /start - Mostra questo messaggio\n\
        /help - Aiuto e istruzioni\n\
        /status - Stato del bot",
        me.username()
    );

    bot.send_message(msg.chat.id, text).await?;
    Ok(())
}

/// Handler for /help command
pub async fn help_handler(bot: Bot, msg: Message) -> ResponseResult<()> {
    let text = "📖 Come usare il bot:\n\n\
        1️⃣ Scrivi una richiesta in linguaggio naturale\n\
        2️⃣ Il modello sceglie gli strumenti del vault\n\
        3️⃣ Ogni scrittura viene verificata sul disco\n\n\
        💡 Esempi:\n\
        - \"Crea una nota Spesa con latte e uova\"\n\
        - \"Aggiungi alla daily: chiamare Marco\"\n\
        - \"Aggiungi il tag #ricette a Cucina/Pasta.md\"\n\
        - \"Cerca le note su Rust\"\n\n\
        Ricordo le ultime note su cui abbiamo lavorato, quindi puoi dire \
        \"aggiungi un tag a quella nota\".\n\n\
        Problemi? Usa /status per controllare la configurazione.";

    bot.send_message(msg.chat.id, text).await?;
    Ok(())
}

/// Handler for /status command
pub async fn status_handler(bot: Bot, msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    bot.send_message(msg.chat.id, status_text(&state.config, state.orchestrator.model_name()))
        .await?;
    Ok(())
}

fn status_text(config: &Config, model: &str) -> String {
    let verification = &config.verification;
    format!(
        "🤖 Stato Bot\n\n\
        ✅ Online e funzionante\n\
        🤖 AI Provider: {} ({})\n\
        📁 Vault: {}\n\
        🔍 Verifica scritture: {}\n\
        🔁 Tentativi: {} (attesa {}s, modalità {})\n\n\
        Pronto a ricevere messaggi!",
        config.ai_model.provider,
        model,
        config.vault.path,
        if verification.verify_writes { "Abilitata" } else { "Disabilitata" },
        verification.max_retries,
        verification.retry_delay_secs,
        if verification.strict_mode { "rigorosa" } else { "permissiva" },
    )
}

/// Handler for text messages: one conversational turn against the vault.
pub async fn text_handler(bot: Bot, msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let Some(text) = msg.text() else {
        bot.send_message(msg.chat.id, "📝 Per ora capisco solo messaggi di testo.")
            .await?;
        return Ok(());
    };

    let session_id = format!("telegram_{}", msg.chat.id);
    log::info!("Received text message for session {}", session_id);

    let session = load_session(&state.sessions, &session_id).await;
    let conversation = &state.config.conversation;
    let intent = Intent::classify(
        text,
        conversation.require_tool_for_writes,
        conversation.require_tool_for_reads,
    );
    let messages = build_messages(&system_prompt(), &session.context, &session.history, text);

    let _ = bot.send_chat_action(msg.chat.id, ChatAction::Typing).await;

    let sink = ContextSink::new(&session_id, &state.sessions);
    let turn = match state.orchestrator.run_turn(messages, intent, Some(&sink)).await {
        Ok(turn) => turn,
        Err(e) => {
            log::error!("Turn failed for {}: {:#}", session_id, e);
            let error_msg = format!(
                "❌ Errore durante l'elaborazione della richiesta.\n\n\
                Dettagli: {}\n\n\
                💡 Usa /status per verificare la configurazione del modello.",
                e
            );
            bot.send_message(msg.chat.id, error_msg).await?;
            return Ok(());
        }
    };

    log::info!(
        "Turn for {}: {} call(s), {} in / {} out tokens",
        session_id,
        turn.calls.len(),
        turn.usage.input_tokens,
        turn.usage.output_tokens
    );

    let reply = reply_text(&turn);

    // The pipeline may have updated the stored context during the turn.
    let mut session = load_session(&state.sessions, &session_id).await;
    session.record_exchange(text, &reply, conversation.history_limit);
    if let Err(e) = state.sessions.save(&session).await {
        log::warn!("Failed to save session {}: {:#}", session_id, e);
    }

    for chunk in split_message(&reply, MAX_MESSAGE_CHARS) {
        bot.send_message(msg.chat.id, chunk).await?;
    }
    Ok(())
}

async fn load_session(store: &JsonSessionStore, session_id: &str) -> Session {
    match store.load(session_id).await {
        Ok(Some(session)) => session,
        Ok(None) => Session::new(session_id),
        Err(e) => {
            log::warn!("Starting a fresh session for {}: {:#}", session_id, e);
            Session::new(session_id)
        }
    }
}

fn system_prompt() -> String {
    let today = chrono::Local::now().format("%Y-%m-%d");
    format!(
        "You are an assistant that manages the user's Obsidian vault. Today is {}.\n\n\
        Use the provided tools for every read or change to the vault. Never claim that a note \
        was created, updated, tagged or found unless a tool result says so. If a tool reports \
        a failure, tell the user what went wrong.\n\n\
        Reply in the user's language, briefly, without repeating raw JSON.",
        today
    )
}

/// The model's answer, or a summary of the calls when it produced no text.
fn reply_text(turn: &TurnOutcome) -> String {
    if !turn.text.trim().is_empty() {
        return turn.text.trim().to_string();
    }
    if turn.calls.is_empty() {
        return "🤔 Non ho una risposta per questo messaggio.".to_string();
    }

    let failed = turn.calls.iter().filter(|call| !call.is_success()).count();
    if failed == 0 {
        format!("✅ Fatto ({} operazione/i).", turn.calls.len())
    } else {
        format!("⚠️ {} operazione/i su {} non riuscita/e.", failed, turn.calls.len())
    }
}

/// Split on line boundaries into chunks of at most `limit` characters.
fn split_message(text: &str, limit: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();

    for line in text.lines() {
        let mut line = line.to_string();
        while line.chars().count() > limit {
            let head: String = line.chars().take(limit).collect();
            line = line.chars().skip(limit).collect();
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
            }
            chunks.push(head);
        }

        if current.chars().count() + line.chars().count() + 1 > limit && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push('\n');
        }
        current.push_str(&line);
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}
