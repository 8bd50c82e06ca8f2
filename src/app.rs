use std::sync::Arc;

use anyhow::{Context, Result};

use crate::api;
use crate::config;
use crate::data::{
    ApiCommentService, ApiFeedService, ApiInteractionService, ApiProfileService, ApiResultsService,
    CommentService, FeedService, InteractionService, ProfileService, ResultsService,
};
use crate::media;
use crate::session;
use crate::storage;
use crate::ui;

pub fn run() -> Result<()> {
    let cfg = config::load(config::LoadOptions::default()).context("load config")?;
    let config_path = config::default_path();
    let display_path = friendly_path(config_path.as_ref());

    let store =
        Arc::new(storage::Store::open(storage::Options::default()).context("open storage")?);

    let user_agent = if cfg.api.user_agent.trim().is_empty() {
        format!("votix/{}", crate::VERSION)
    } else {
        cfg.api.user_agent.clone()
    };

    let media_cfg = media::Config {
        default_ttl: cfg.media.default_ttl,
        workers: cfg.media.workers,
        user_agent: user_agent.clone(),
        http_client: None,
    };
    let media_manager = media::Manager::new(store.clone(), media_cfg).ok();
    let media_handle = media_manager.as_ref().map(|manager| manager.handle());

    let flow = Arc::new(
        session::Flow::new(store.clone(), &cfg.api.base_url, &user_agent)
            .context("build session flow")?,
    );
    let session_manager = Arc::new(session::Manager::new(store.clone(), flow)?);
    session_manager
        .load_existing()
        .context("resume stored sessions")?;

    let mut feed_service: Option<Arc<dyn FeedService>> = None;
    let mut results_service: Option<Arc<dyn ResultsService>> = None;
    let mut comment_service: Option<Arc<dyn CommentService>> = None;
    let mut interaction_service: Option<Arc<dyn InteractionService>> = None;
    let mut profile_service: Option<Arc<dyn ProfileService>> = None;

    let status: String;
    let content: String;

    if session_manager.active().is_some() {
        let provider = session_manager.active_token_provider()?;
        let client = Arc::new(api::Client::new(
            provider,
            api::ClientConfig {
                user_agent: user_agent.clone(),
                base_url: Some(cfg.api.base_url.clone()),
                http_client: None,
            },
        )?);
        feed_service = Some(Arc::new(ApiFeedService::new(client.clone())));
        results_service = Some(Arc::new(ApiResultsService::new(client.clone())));
        comment_service = Some(Arc::new(ApiCommentService::new(client.clone())));
        interaction_service = Some(Arc::new(ApiInteractionService::new(client.clone())));
        profile_service = Some(Arc::new(ApiProfileService::new(client)));

        status =
            "Browsing surveys. j/k to navigate, Enter to vote or view results, q to quit."
                .to_string();
        content = "Select a survey to see its questions, results and comments.".to_string();
    } else {
        status = "Not signed in. Press a to open the account menu.".to_string();
        content = "Votix is ready.\n\nSign in (press a) to load available, voted and finished surveys. Surveys autoplay their video while more than half of the card is on screen; press m to mute."
            .to_string();
    }

    let options = ui::Options {
        status_message: status,
        content,
        api_base_url: cfg.api.base_url.clone(),
        user_agent,
        feed_service,
        results_service,
        comment_service,
        interaction_service,
        profile_service,
        media_handle,
        session_manager: Some(session_manager),
        ui_config: cfg.ui.clone(),
        player_config: cfg.player.clone(),
        config_path: display_path,
        check_updates_on_start: true,
    };

    let mut model = ui::Model::new(options);
    model.run()?;

    drop(media_manager);

    Ok(())
}

fn friendly_path(path: Option<&std::path::PathBuf>) -> String {
    if let Some(path) = path {
        if let Some(home) = dirs::home_dir() {
            if let Ok(stripped) = path.strip_prefix(&home) {
                let mut display = String::from("~");
                if !stripped.as_os_str().is_empty() {
                    display.push_str(&format!("/{}", stripped.display()));
                }
                return display;
            }
        }
        path.display().to_string()
    } else {
        "~/.config/votix/config.yaml".to_string()
    }
}
