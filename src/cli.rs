//! Interactive console
//!
//! A small REPL for live operation without the companion app: toggling
//! learn mode, inspecting and clearing pad bindings, and poking the OBS
//! bridge.

use anyhow::Result;
use colored::*;
use rustyline::DefaultEditor;
use std::sync::Arc;

use crate::gateway::SystemAction;
use crate::plugins::{ControlMapping, PluginId};
use crate::router::Router;

pub async fn run_console(router: Arc<Router>) -> Result<()> {
    println!(
        "{}",
        "padgrid-gw console — type 'help' for commands".bold().cyan()
    );

    let mut rl = DefaultEditor::new()?;

    loop {
        // Readline blocks; keep it off the async worker threads
        let (editor, readline) = tokio::task::spawn_blocking(move || {
            let line = rl.readline("padgrid> ");
            (rl, line)
        })
        .await?;
        rl = editor;

        let line = match readline {
            Ok(line) => line,
            Err(_) => break,
        };

        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let _ = rl.add_history_entry(line);

        let mut parts = line.split_whitespace();
        match parts.next() {
            Some("help") => print_help(),
            Some("exit") | Some("quit") => break,

            Some("status") => print_status(&router),

            Some("learn") => match parts.next() {
                Some("on") => router.set_learn_mode(true),
                Some("off") => router.set_learn_mode(false),
                _ => println!("usage: learn on|off"),
            },

            Some("target") => match parts.next().and_then(|s| s.parse::<usize>().ok()) {
                Some(index) => match router.set_learn_target(index) {
                    Ok(()) => println!("cell {} armed for learning", index),
                    Err(e) => println!("{}", e.to_string().red()),
                },
                None => println!("usage: target <cell>"),
            },

            Some("clear") => match parts.next().and_then(|s| s.parse::<usize>().ok()) {
                Some(index) => match router.clear_cell(index).await {
                    Ok(()) => println!("cell {} cleared", index),
                    Err(e) => println!("{}", e.to_string().red()),
                },
                None => println!("usage: clear <cell>"),
            },

            Some("map") => {
                let index = parts.next().and_then(|s| s.parse::<usize>().ok());
                let plugin = parts.next();
                let target = parts.next();
                match (index, plugin, target) {
                    (Some(index), Some(plugin), Some(target)) => {
                        let plugin = match plugin {
                            "obs" => PluginId::Obs,
                            "console" => PluginId::Console,
                            other => {
                                println!("unknown plugin '{}'", other);
                                continue;
                            }
                        };
                        match router
                            .assign_mapping(index, ControlMapping::new(plugin, target))
                            .await
                        {
                            Ok(()) => println!("cell {} mapped", index),
                            Err(e) => println!("{}", e.to_string().red()),
                        }
                    }
                    _ => println!("usage: map <cell> <obs|console> <target>"),
                }
            }

            Some("scenes") => {
                let scenes = router.bridge().cache().scenes();
                if scenes.is_empty() {
                    println!("no scene catalog (is OBS connected?)");
                }
                let current = router.bridge().cache().current_scene();
                for scene in scenes {
                    let marker = if current.as_ref().map(|c| &c.uuid) == Some(&scene.uuid) {
                        "▶".green().to_string()
                    } else {
                        " ".to_string()
                    };
                    println!("  {} {} ({})", marker, scene.name.bright_white(), scene.uuid);
                }
            }

            Some("record") => router.system(SystemAction::ToggleRecording),
            Some("refresh") => router.system(SystemAction::Refresh),
            Some("next") => router.system(SystemAction::NextScene),
            Some("prev") => router.system(SystemAction::PreviousScene),
            Some("reconnect") => router.bridge().reconnect(),

            Some(other) => println!("unknown command '{}'; try 'help'", other),
            None => {}
        }
    }

    Ok(())
}

fn print_help() {
    println!("{}", "Commands:".bold());
    println!("  status              show grid and connection state");
    println!("  learn on|off        toggle learn mode");
    println!("  target <cell>       arm a cell for the next trigger");
    println!("  clear <cell>        remove a cell's binding");
    println!("  map <cell> <plugin> <target>   assign a mapping");
    println!("  scenes              list the OBS scene catalog");
    println!("  record|refresh|next|prev       OBS system actions");
    println!("  reconnect           re-dial the OBS session");
    println!("  exit                quit the console");
}

fn print_status(router: &Router) {
    let snapshot = router.snapshot("padgrid-gw");

    println!(
        "{} {}",
        "Recording:".bold(),
        if snapshot.recording_active {
            "active".red().to_string()
        } else {
            "stopped".normal().to_string()
        }
    );
    if let Some(scene) = &snapshot.scene_name {
        println!("{} {}", "Scene:".bold(), scene.bright_white());
    }
    println!(
        "{} {}",
        "Learn mode:".bold(),
        if router.learn_mode() { "on".yellow().to_string() } else { "off".to_string() }
    );

    println!("{}", "Pads:".bold());
    for pad in &snapshot.pads {
        if pad.trigger_label.is_empty() && !pad.has_mapping {
            continue;
        }
        println!(
            "  {:>2}  {:<22} {:<24} {}",
            pad.id,
            pad.trigger_label.yellow(),
            pad.target_title.green(),
            pad.status_text.dimmed()
        );
    }
}
