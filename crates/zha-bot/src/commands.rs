//! Commands the binary ships with.

use crate::bot::Bot;
use crate::message::Message;

/// Register `ping`, `echo <text>`, `remember <key> <value>`, `recall <key>`
/// and `forget <key>`.
pub fn register_builtin(bot: &Bot) {
    bot.respond("ping", |message: Message| async move { message.respond("pong").await });

    bot.respond("echo (.+)", |message: Message| async move {
        let text = message.matched(0).unwrap_or_default().to_string();
        message.respond(text).await
    });

    bot.respond(r"remember (\S+) (.+)", |message: Message| async move {
        let (key, value) = (&message.matches[0], &message.matches[1]);
        message.memory().set(key, value).await?;
        message.respond(format!("I'll remember {key}")).await
    });

    bot.respond(r"recall (\S+)", |message: Message| async move {
        let key = &message.matches[0];
        let reply = match message.memory().get(key).await? {
            Some(value) => format!("{key} is {value}"),
            None => format!("I don't know anything about {key}"),
        };
        message.respond(reply).await
    });

    bot.respond(r"forget (\S+)", |message: Message| async move {
        let key = &message.matches[0];
        let reply = if message.memory().delete(key).await? {
            format!("Forgot {key}")
        } else {
            format!("I never knew {key}")
        };
        message.respond(reply).await
    });
}
