use std::sync::Arc;
use std::time::Duration;

use poise::serenity_prelude::{self as serenity};
use serenity::GatewayIntents;
use tracing::{error, info};
use warden_daemon::config::Settings;
use warden_daemon::moderation::{DEFAULT_BUFFER, SerenityRemote, TokioScheduler};
use warden_daemon::{Data, Error, commands, handlers, logging};

/// How often moderation state is written to disk
const AUTOSAVE_PERIOD: Duration = Duration::from_secs(300);
const PREFIX: &str = "!";

/// Main function to run the bot
async fn async_main() -> Result<(), Error> {
    logging::init()?;

    let settings = Settings::from_env()?;
    let token = settings.token.clone();

    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions {
            commands: commands::all(),
            prefix_options: poise::PrefixFrameworkOptions {
                prefix: Some(PREFIX.to_string()),
                ..Default::default()
            },
            pre_command: |ctx| {
                Box::pin(async move {
                    logging::log_command_start(ctx);
                })
            },
            post_command: |ctx| {
                Box::pin(async move {
                    logging::log_command_end(ctx);
                })
            },
            on_error: |error| {
                Box::pin(async move {
                    logging::log_command_error(&error);
                    // Answer argument and permission errors in the channel
                    if let Err(e) = poise::builtins::on_error(error).await {
                        error!(error = %e, "Failed reporting framework error");
                    }
                })
            },
            ..Default::default()
        })
        .setup(move |ctx, ready, framework| {
            Box::pin(async move {
                logging::log_ready(&ready.user.name, ready.guilds.len());
                poise::builtins::register_globally(ctx, &framework.options().commands).await?;

                let remote = Arc::new(SerenityRemote::new(
                    ctx.http.clone(),
                    ctx.cache.clone(),
                    ready.user.id,
                ));
                let (scheduler, rx) = TokioScheduler::new(DEFAULT_BUFFER);
                let sweep_interval = settings.sweep_interval;
                let data = Data::load(settings, remote, Arc::new(scheduler)).await;

                let recovered = data.coordinator.recover_schedules().await?;
                info!(recovered, "Recovered mute expiries");

                tokio::spawn(data.coordinator.clone().run(rx, sweep_interval));
                data.refresh.spawn_listener(data.coordinator.clone());
                data.spawn_autosave(AUTOSAVE_PERIOD);

                // Gateway events read the same state through the type map
                ctx.data.write().await.insert::<Data>(data.clone());
                Ok(data)
            })
        })
        .build();

    let intents = GatewayIntents::non_privileged()
        | GatewayIntents::GUILD_MEMBERS
        | GatewayIntents::MESSAGE_CONTENT;
    let mut client = serenity::ClientBuilder::new(token, intents)
        .event_handler(handlers::Handler)
        .framework(framework)
        .await?;

    let shard_manager = client.shard_manager.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed listening for ctrl-c");
            return;
        }
        info!("Shutting down");
        shard_manager.shutdown_all().await;
    });

    info!("Starting bot...");
    if let Err(err) = client.start().await {
        error!(error = %err, "Client stopped with an error");
    }

    let data = client.data.read().await.get::<Data>().cloned();
    if let Some(data) = data {
        data.save().await?;
        info!("Saved moderation state");
    }

    Ok(())
}

fn main() {
    let result = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(Error::from)
        .and_then(|runtime| runtime.block_on(async_main()));

    if let Err(err) = result {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}
