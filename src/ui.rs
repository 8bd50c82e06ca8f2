use std::collections::{HashMap, HashSet};
use std::io::{self, Stdout};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use crossbeam_channel::{unbounded, Receiver, Sender};
use crossterm::event::{self, DisableFocusChange, EnableFocusChange, Event, KeyCode, KeyEventKind};
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use crossterm::ExecutableCommand;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{Block, Borders, Clear, Paragraph};
use ratatui::{Frame, Terminal};
use semver::Version;
use unicode_width::UnicodeWidthStr;

use crate::api::{self, Me, Survey, VoteAnswer};
use crate::config;
use crate::data::{
    self, CommentService, FeedService, FeedTab, InteractionService, ProfileService, ResultsService,
};
use crate::feed::{self, FeedItem, MediaRef};
use crate::media;
use crate::playback::{self, Action, Coordinator};
use crate::player::{self, debug_log, InlineSession, SurfaceGeometry, VideoSource};
use crate::session;
use crate::update;

const SPINNER_FRAMES: [&str; 4] = ["|", "/", "-", "\\"];
const FEED_CACHE_TTL: Duration = Duration::from_secs(60);

// Nominal terminal cell size in pixels; used to map the probe's layout
// units onto rows and to size the inline video surface.
const CELL_PX_W: f64 = 8.0;
const CELL_PX_H: f64 = 16.0;
const MIN_MEDIA_ROWS: usize = 3;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Pane {
    Navigation,
    Surveys,
    Content,
}

impl Pane {
    fn title(self) -> &'static str {
        match self {
            Pane::Navigation => "Feeds",
            Pane::Surveys => "Surveys",
            Pane::Content => "Detail",
        }
    }

    fn next(self) -> Self {
        match self {
            Pane::Navigation => Pane::Surveys,
            Pane::Surveys => Pane::Content,
            Pane::Content => Pane::Navigation,
        }
    }

    fn previous(self) -> Self {
        match self {
            Pane::Navigation => Pane::Content,
            Pane::Surveys => Pane::Navigation,
            Pane::Content => Pane::Surveys,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum MenuScreen {
    Root,
    Login,
    Register,
}

#[derive(Default)]
struct LoginForm {
    email: String,
    password: String,
    focus: usize,
    status: String,
    in_progress: bool,
}

#[derive(Default)]
struct RegisterForm {
    name: String,
    email: String,
    password: String,
    focus: usize,
    status: String,
    in_progress: bool,
}

struct VoteForm {
    survey_id: i64,
    title: String,
    questions: Vec<api::Question>,
    selections: HashMap<i64, i64>,
    question_index: usize,
    option_index: usize,
    status: String,
    in_progress: bool,
}

impl VoteForm {
    fn new(survey: &Survey) -> Self {
        Self {
            survey_id: survey.id,
            title: survey.title.clone(),
            questions: survey.questions.clone(),
            selections: HashMap::new(),
            question_index: 0,
            option_index: 0,
            status: String::new(),
            in_progress: false,
        }
    }

    fn current_question(&self) -> Option<&api::Question> {
        self.questions.get(self.question_index)
    }

    fn select_current(&mut self) {
        let Some(question) = self.questions.get(self.question_index) else {
            return;
        };
        if let Some(option) = question.options.get(self.option_index) {
            self.selections.insert(question.id, option.id);
        }
    }

    fn answers(&self) -> Vec<VoteAnswer> {
        self.questions
            .iter()
            .filter_map(|question| {
                self.selections
                    .get(&question.id)
                    .map(|option_id| VoteAnswer {
                        question_id: question.id,
                        option_id: *option_id,
                    })
            })
            .collect()
    }

    fn complete(&self) -> bool {
        !self.questions.is_empty() && self.selections.len() == self.questions.len()
    }
}

#[derive(Default)]
struct CommentForm {
    survey_id: i64,
    text: String,
    status: String,
    in_progress: bool,
}

struct PendingFeed {
    request_id: u64,
    tab: FeedTab,
    cancel_flag: Arc<AtomicBool>,
}

struct PendingResults {
    request_id: u64,
    survey_id: i64,
}

struct PendingComments {
    request_id: u64,
    survey_id: i64,
    cancel_flag: Arc<AtomicBool>,
}

enum AsyncResponse {
    Feed {
        request_id: u64,
        tab: FeedTab,
        result: Result<Vec<Survey>>,
    },
    Results {
        request_id: u64,
        survey_id: i64,
        result: Result<api::SurveyResults>,
    },
    Comments {
        request_id: u64,
        survey_id: i64,
        result: Result<Vec<api::Comment>>,
    },
    CommentCount {
        survey_id: i64,
        result: Result<i64>,
    },
    VoteResult {
        survey_id: i64,
        result: Result<api::VoteReceipt>,
    },
    CommentPosted {
        survey_id: i64,
        result: Result<api::Comment>,
    },
    Login {
        result: Result<String>,
    },
    Register {
        result: Result<String>,
    },
    Profile {
        result: Result<Me>,
    },
    Gamification {
        result: Result<api::GamificationStatus>,
    },
    Update {
        result: Result<Option<update::UpdateInfo>>,
    },
}

struct Spinner {
    index: usize,
    last_tick: Instant,
}

impl Spinner {
    fn new() -> Self {
        Self {
            index: 0,
            last_tick: Instant::now(),
        }
    }

    fn frame(&self) -> &'static str {
        SPINNER_FRAMES[self.index % SPINNER_FRAMES.len()]
    }

    fn advance(&mut self) -> bool {
        let now = Instant::now();
        if now.duration_since(self.last_tick) >= Duration::from_millis(120) {
            self.index = (self.index + 1) % SPINNER_FRAMES.len();
            self.last_tick = now;
            true
        } else {
            false
        }
    }

    fn reset(&mut self) {
        self.index = 0;
        self.last_tick = Instant::now();
    }
}

/// A survey plus everything the renderer derived from it once at fetch
/// time: classified media and the countdown baseline.
pub struct SurveyCard {
    pub survey: Survey,
    pub item: FeedItem,
    fetched_at: Instant,
}

impl SurveyCard {
    pub fn new(survey: Survey) -> Self {
        let item = FeedItem::new(survey.id, survey.media_url.as_deref(), &survey.media_urls);
        Self {
            survey,
            item,
            fetched_at: Instant::now(),
        }
    }

    fn remaining_seconds(&self) -> Option<i64> {
        let snapshot = self.survey.remaining_seconds?;
        Some(snapshot - self.fetched_at.elapsed().as_secs() as i64)
    }
}

struct FeedCacheEntry {
    surveys: Vec<Survey>,
    fetched_at: Instant,
}

pub struct Options {
    pub status_message: String,
    pub content: String,
    pub api_base_url: String,
    pub user_agent: String,
    pub feed_service: Option<Arc<dyn FeedService>>,
    pub results_service: Option<Arc<dyn ResultsService>>,
    pub comment_service: Option<Arc<dyn CommentService>>,
    pub interaction_service: Option<Arc<dyn InteractionService>>,
    pub profile_service: Option<Arc<dyn ProfileService>>,
    pub media_handle: Option<media::Handle>,
    pub session_manager: Option<Arc<session::Manager>>,
    pub ui_config: config::UIConfig,
    pub player_config: config::PlayerConfig,
    pub config_path: String,
    pub check_updates_on_start: bool,
}

pub struct Model {
    status_message: String,
    fallback_content: String,
    tab: FeedTab,
    nav_index: usize,
    cards: Vec<SurveyCard>,
    card_heights: Vec<usize>,
    selected: usize,
    scroll_row: usize,
    surveys_area: Option<Rect>,
    active_media_rect: Option<Rect>,

    coordinator: Coordinator,
    player_session: Option<(i64, u64, InlineSession)>,
    inline_video: bool,
    mpv_path: String,
    api_base_url: String,
    user_agent: String,
    visibility_threshold: f64,

    heights: media::HeightRegistry,
    media_handle: Option<media::Handle>,
    pending_probes: HashMap<i64, Receiver<media::Probe>>,
    probed: HashSet<i64>,

    feed_service: Option<Arc<dyn FeedService>>,
    results_service: Option<Arc<dyn ResultsService>>,
    comment_service: Option<Arc<dyn CommentService>>,
    interaction_service: Option<Arc<dyn InteractionService>>,
    profile_service: Option<Arc<dyn ProfileService>>,

    feed_cache: HashMap<FeedTab, FeedCacheEntry>,
    results: HashMap<i64, api::SurveyResults>,
    comments: HashMap<i64, Vec<api::Comment>>,
    comment_counts: HashMap<i64, i64>,
    profile: Option<Me>,
    gamification: Option<api::GamificationStatus>,

    focused_pane: Pane,
    menu_visible: bool,
    menu_screen: MenuScreen,
    login_form: LoginForm,
    register_form: RegisterForm,
    vote_form: Option<VoteForm>,
    comment_form: Option<CommentForm>,
    terminal_focused: bool,

    update_notice: Option<update::UpdateInfo>,
    update_checked: bool,
    check_updates_on_start: bool,
    current_version: Version,

    session_manager: Option<Arc<session::Manager>>,
    config_path: String,

    needs_redraw: bool,
    spinner: Spinner,
    response_tx: Sender<AsyncResponse>,
    response_rx: Receiver<AsyncResponse>,
    next_request_id: u64,
    pending_feed: Option<PendingFeed>,
    pending_results: Option<PendingResults>,
    pending_comments: Option<PendingComments>,
}

impl Model {
    pub fn new(opts: Options) -> Self {
        let (response_tx, response_rx) = unbounded();
        let mut coordinator = Coordinator::new();
        if opts.ui_config.start_muted {
            coordinator.set_muted(true);
        }
        Self {
            status_message: opts.status_message,
            fallback_content: opts.content,
            tab: FeedTab::Available,
            nav_index: 0,
            cards: Vec::new(),
            card_heights: Vec::new(),
            selected: 0,
            scroll_row: 0,
            surveys_area: None,
            active_media_rect: None,
            coordinator,
            player_session: None,
            inline_video: opts.player_config.inline_video,
            mpv_path: opts.player_config.mpv_path,
            api_base_url: opts.api_base_url,
            user_agent: opts.user_agent,
            visibility_threshold: opts.ui_config.visibility_threshold,
            heights: media::HeightRegistry::new(0.0),
            media_handle: opts.media_handle,
            pending_probes: HashMap::new(),
            probed: HashSet::new(),
            feed_service: opts.feed_service,
            results_service: opts.results_service,
            comment_service: opts.comment_service,
            interaction_service: opts.interaction_service,
            profile_service: opts.profile_service,
            feed_cache: HashMap::new(),
            results: HashMap::new(),
            comments: HashMap::new(),
            comment_counts: HashMap::new(),
            profile: None,
            gamification: None,
            focused_pane: Pane::Surveys,
            menu_visible: false,
            menu_screen: MenuScreen::Root,
            login_form: LoginForm::default(),
            register_form: RegisterForm::default(),
            vote_form: None,
            comment_form: None,
            terminal_focused: true,
            update_notice: None,
            update_checked: false,
            check_updates_on_start: opts.check_updates_on_start,
            current_version: Version::parse(crate::VERSION)
                .unwrap_or_else(|_| Version::new(0, 0, 0)),
            session_manager: opts.session_manager,
            config_path: opts.config_path,
            needs_redraw: true,
            spinner: Spinner::new(),
            response_tx,
            response_rx,
            next_request_id: 0,
            pending_feed: None,
            pending_results: None,
            pending_comments: None,
        }
    }

    pub fn run(&mut self) -> Result<()> {
        let mut stdout = io::stdout();
        enable_raw_mode()?;
        stdout.execute(EnterAlternateScreen)?;
        stdout.execute(EnableFocusChange)?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;
        terminal.clear()?;

        if self.feed_service.is_some() {
            self.reload_feed(false)?;
        }
        if self.check_updates_on_start {
            self.queue_update_check();
        }

        let result = self.event_loop(&mut terminal);

        self.teardown_player();
        disable_raw_mode()?;
        terminal.backend_mut().execute(DisableFocusChange)?;
        terminal.backend_mut().execute(LeaveAlternateScreen)?;
        terminal.show_cursor()?;

        result
    }

    fn event_loop(&mut self, terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
        let mut last_tick = Instant::now();
        let tick_rate = Duration::from_millis(120);

        loop {
            if self.poll_async() {
                self.mark_dirty();
            }

            if self.needs_redraw {
                terminal.draw(|frame| self.draw(frame))?;
                self.needs_redraw = false;
                self.sync_playback();
            }

            let timeout = tick_rate
                .checked_sub(last_tick.elapsed())
                .unwrap_or_else(|| Duration::from_millis(16));

            if event::poll(timeout)? {
                match event::read()? {
                    Event::Key(key) if key.kind == KeyEventKind::Press => {
                        match self.handle_key(key.code) {
                            Ok(true) => break,
                            Ok(false) => {}
                            Err(err) => {
                                self.status_message = format!("Error: {}", err);
                                self.mark_dirty();
                            }
                        }
                    }
                    Event::FocusGained => {
                        self.terminal_focused = true;
                        self.sync_screen_focus();
                    }
                    Event::FocusLost => {
                        self.terminal_focused = false;
                        self.sync_screen_focus();
                    }
                    Event::Resize(_, _) => self.mark_dirty(),
                    _ => {}
                }
            }

            if self.poll_async() {
                self.mark_dirty();
            }

            self.poll_player();

            if last_tick.elapsed() >= tick_rate {
                last_tick = Instant::now();
                let mut ticked = false;
                if self.is_loading() && self.spinner.advance() {
                    ticked = true;
                } else if !self.is_loading() {
                    self.spinner.reset();
                }
                if self.has_running_countdown() {
                    ticked = true;
                }
                if ticked {
                    self.mark_dirty();
                }
            }
        }

        Ok(())
    }

    fn mark_dirty(&mut self) {
        self.needs_redraw = true;
    }

    fn is_loading(&self) -> bool {
        self.pending_feed.is_some()
            || self.pending_results.is_some()
            || self.pending_comments.is_some()
    }

    fn has_running_countdown(&self) -> bool {
        self.tab == FeedTab::Available
            && self
                .cards
                .iter()
                .any(|card| card.remaining_seconds().map(|s| s > 0).unwrap_or(false))
    }

    fn next_id(&mut self) -> u64 {
        let id = self.next_request_id;
        self.next_request_id = self.next_request_id.wrapping_add(1);
        id
    }

    // ---- screen focus / playback -------------------------------------------------

    fn overlay_open(&self) -> bool {
        self.menu_visible || self.vote_form.is_some() || self.comment_form.is_some()
    }

    /// The feed counts as focused only while the terminal itself has focus
    /// and no overlay is covering the cards.
    fn sync_screen_focus(&mut self) {
        let focused = self.terminal_focused && !self.overlay_open();
        let commands = self.coordinator.set_screen_focus(focused);
        if !commands.is_empty() {
            self.apply_playback_commands(commands);
            self.mark_dirty();
        }
    }

    fn sync_playback(&mut self) {
        let Some(area) = self.surveys_area else {
            return;
        };
        let ids: Vec<i64> = self.cards.iter().map(|card| card.item.id).collect();
        let viewport = area.height.saturating_sub(2) as usize;
        let visible = compute_visible_ids(
            &self.card_heights,
            &ids,
            self.scroll_row,
            viewport,
            self.visibility_threshold,
        );
        let commands = self.coordinator.update_visibility(&visible);
        if !commands.is_empty() {
            self.apply_playback_commands(commands);
            self.mark_dirty();
        }
    }

    fn apply_playback_commands(&mut self, commands: Vec<playback::Command>) {
        for command in commands {
            match command.action {
                Action::Deactivate => {
                    if let Some((id, generation, session)) = self.player_session.take() {
                        if id == command.item_id {
                            let mut session = session;
                            playback::apply_command(
                                &command,
                                &mut session,
                                self.coordinator.global_muted(),
                            );
                            // Dropping the session kills the decoder; the
                            // cell goes back to its placeholder.
                            drop(session);
                        } else {
                            self.player_session = Some((id, generation, session));
                        }
                    }
                }
                Action::Activate => {
                    self.teardown_player();
                    if let Some(session) = self.spawn_player_for(command.item_id) {
                        let mut session = session;
                        playback::apply_command(
                            &command,
                            &mut session,
                            self.coordinator.global_muted(),
                        );
                        self.player_session = Some((command.item_id, command.generation, session));
                    }
                }
                Action::SetMuted(muted) => {
                    if let Some((id, generation, session)) = self.player_session.as_mut() {
                        if *id == command.item_id
                            && self.coordinator.is_current(*id, *generation)
                        {
                            playback::apply_command(&command, session, muted);
                        }
                    }
                }
            }
        }
    }

    fn spawn_player_for(&mut self, item_id: i64) -> Option<InlineSession> {
        if !self.inline_video || !inline_video_supported() {
            return None;
        }
        let card = self.cards.iter().find(|card| card.item.id == item_id)?;
        let MediaRef::LocalVideo { url } = card.item.media.as_ref()? else {
            return None;
        };
        let source = VideoSource::new(url, &card.survey.title)?;
        let rect = self.active_media_rect?;
        let geometry = surface_geometry(rect);
        match player::spawn_inline_player(player::InlineLaunchOptions {
            mpv_path: &self.mpv_path,
            source: &source,
            user_agent: &self.user_agent,
            geometry,
            start_muted: self.coordinator.global_muted(),
        }) {
            Ok(session) => Some(session),
            Err(err) => {
                debug_log(format!("inline player failed for item {item_id}: {err}"));
                None
            }
        }
    }

    fn teardown_player(&mut self) {
        if let Some((_, _, session)) = self.player_session.take() {
            drop(session);
        }
    }

    fn poll_player(&mut self) {
        let ended = if let Some((_, _, session)) = self.player_session.as_mut() {
            session.try_status().is_some()
        } else {
            false
        };
        if ended {
            self.player_session = None;
            self.mark_dirty();
        }
    }

    fn toggle_mute(&mut self) {
        let commands = self.coordinator.toggle_muted();
        self.apply_playback_commands(commands);
        self.status_message = if self.coordinator.global_muted() {
            "Muted media playback.".to_string()
        } else {
            "Unmuted media playback.".to_string()
        };
        self.mark_dirty();
    }

    // ---- feed loading ------------------------------------------------------------

    fn reload_feed(&mut self, force: bool) -> Result<()> {
        let Some(service) = self.feed_service.clone() else {
            self.status_message = "Sign in to load surveys (press a).".to_string();
            self.apply_feed(Vec::new());
            return Ok(());
        };

        if !force {
            if let Some(entry) = self.feed_cache.get(&self.tab) {
                if entry.fetched_at.elapsed() < FEED_CACHE_TTL {
                    let surveys = entry.surveys.clone();
                    if let Some(pending) = self.pending_feed.take() {
                        pending.cancel_flag.store(true, Ordering::SeqCst);
                    }
                    self.apply_feed(surveys);
                    self.mark_dirty();
                    return Ok(());
                }
            }
        }

        if let Some(pending) = self.pending_feed.take() {
            pending.cancel_flag.store(true, Ordering::SeqCst);
        }

        let request_id = self.next_id();
        let cancel_flag = Arc::new(AtomicBool::new(false));
        let tab = self.tab;
        self.pending_feed = Some(PendingFeed {
            request_id,
            tab,
            cancel_flag: cancel_flag.clone(),
        });
        self.status_message = format!("Loading {} surveys...", tab.display_name());
        self.spinner.reset();

        let tx = self.response_tx.clone();
        thread::spawn(move || {
            if cancel_flag.load(Ordering::SeqCst) {
                return;
            }
            let result = service.load_feed(tab);
            if cancel_flag.load(Ordering::SeqCst) {
                return;
            }
            let _ = tx.send(AsyncResponse::Feed {
                request_id,
                tab,
                result,
            });
        });
        Ok(())
    }

    fn apply_feed(&mut self, surveys: Vec<Survey>) {
        self.cards = surveys.into_iter().map(SurveyCard::new).collect();
        self.selected = self.selected.min(self.cards.len().saturating_sub(1));
        self.scroll_row = 0;
        self.card_heights.clear();

        let items: Vec<FeedItem> = self.cards.iter().map(|card| card.item.clone()).collect();
        let rendered: HashSet<i64> = items.iter().map(|item| item.id).collect();
        let commands = self.coordinator.replace_items(items);
        self.apply_playback_commands(commands);

        self.heights.retain(&rendered);
        self.probed.retain(|id| rendered.contains(id));
        self.pending_probes.retain(|id, _| rendered.contains(id));
        self.request_probes();
        self.queue_comment_count_for_selection();
    }

    fn request_probes(&mut self) {
        let Some(handle) = self.media_handle.clone() else {
            return;
        };
        if self.heights.container_width() <= 0.0 {
            return;
        }
        for card in &self.cards {
            let id = card.item.id;
            if self.probed.contains(&id) || self.pending_probes.contains_key(&id) {
                continue;
            }
            let Some(MediaRef::Image { url }) = card.item.media.as_ref() else {
                continue;
            };
            let rx = handle.enqueue(media::Request {
                item_id: id,
                url: url.clone(),
                container_width: self.heights.container_width(),
                force: false,
            });
            self.pending_probes.insert(id, rx);
        }
    }

    fn drain_probes(&mut self) -> bool {
        if self.pending_probes.is_empty() {
            return false;
        }
        let rendered: HashSet<i64> = self.cards.iter().map(|card| card.item.id).collect();
        let mut changed = false;
        let mut done = Vec::new();
        for (id, rx) in &self.pending_probes {
            match rx.try_recv() {
                Ok(probe) => {
                    done.push(*id);
                    // Stale completions for removed cards are dropped here.
                    if self.heights.apply(&rendered, &probe) {
                        changed = true;
                    }
                }
                Err(crossbeam_channel::TryRecvError::Empty) => {}
                Err(crossbeam_channel::TryRecvError::Disconnected) => done.push(*id),
            }
        }
        for id in done {
            self.pending_probes.remove(&id);
            self.probed.insert(id);
        }
        changed
    }

    // ---- selection / navigation --------------------------------------------------

    fn selected_card(&self) -> Option<&SurveyCard> {
        self.cards.get(self.selected)
    }

    fn navigate(&mut self, delta: i32) {
        match self.focused_pane {
            Pane::Navigation => {
                let count = FeedTab::ALL.len() as i32;
                let next = (self.nav_index as i32 + delta).rem_euclid(count);
                self.nav_index = next as usize;
            }
            Pane::Surveys | Pane::Content => {
                if self.cards.is_empty() {
                    return;
                }
                let last = self.cards.len() as i32 - 1;
                let next = (self.selected as i32 + delta).clamp(0, last);
                if next as usize != self.selected {
                    self.selected = next as usize;
                    self.ensure_selected_visible();
                    self.queue_comment_count_for_selection();
                }
            }
        }
        self.mark_dirty();
    }

    fn ensure_selected_visible(&mut self) {
        let Some(area) = self.surveys_area else {
            return;
        };
        let viewport = area.height.saturating_sub(2) as usize;
        if viewport == 0 || self.card_heights.len() != self.cards.len() {
            return;
        }
        let start: usize = self.card_heights[..self.selected].iter().sum();
        let height = self.card_heights[self.selected];
        if start < self.scroll_row {
            self.scroll_row = start;
        } else if start + height > self.scroll_row + viewport {
            self.scroll_row = (start + height).saturating_sub(viewport);
        }
    }

    fn commit_tab_selection(&mut self) -> Result<()> {
        let tab = FeedTab::ALL[self.nav_index.min(FeedTab::ALL.len() - 1)];
        if tab != self.tab {
            self.tab = tab;
            self.selected = 0;
            self.scroll_row = 0;
            self.reload_feed(false)?;
        }
        self.focused_pane = Pane::Surveys;
        self.mark_dirty();
        Ok(())
    }

    // ---- async plumbing ----------------------------------------------------------

    fn poll_async(&mut self) -> bool {
        let mut changed = self.drain_probes();
        while let Ok(message) = self.response_rx.try_recv() {
            self.handle_async_response(message);
            changed = true;
        }
        changed
    }

    fn handle_async_response(&mut self, message: AsyncResponse) {
        match message {
            AsyncResponse::Feed {
                request_id,
                tab,
                result,
            } => {
                let Some(pending) = &self.pending_feed else {
                    return;
                };
                if pending.cancel_flag.load(Ordering::SeqCst)
                    || pending.request_id != request_id
                    || pending.tab != tab
                {
                    return;
                }
                self.pending_feed = None;
                match result {
                    Ok(surveys) => {
                        self.feed_cache.insert(
                            tab,
                            FeedCacheEntry {
                                surveys: surveys.clone(),
                                fetched_at: Instant::now(),
                            },
                        );
                        let count = surveys.len();
                        self.apply_feed(surveys);
                        self.status_message = format!(
                            "Loaded {} {} survey{}.",
                            count,
                            tab.display_name().to_lowercase(),
                            if count == 1 { "" } else { "s" }
                        );
                    }
                    Err(err) => {
                        self.status_message = format!("Failed to load surveys: {err}");
                    }
                }
            }
            AsyncResponse::Results {
                request_id,
                survey_id,
                result,
            } => {
                let Some(pending) = &self.pending_results else {
                    return;
                };
                if pending.request_id != request_id || pending.survey_id != survey_id {
                    return;
                }
                self.pending_results = None;
                match result {
                    Ok(results) => {
                        self.results.insert(survey_id, results);
                        self.status_message = "Results loaded.".to_string();
                    }
                    Err(err) => {
                        self.status_message = format!("Failed to load results: {err}");
                    }
                }
            }
            AsyncResponse::Comments {
                request_id,
                survey_id,
                result,
            } => {
                let Some(pending) = &self.pending_comments else {
                    return;
                };
                if pending.cancel_flag.load(Ordering::SeqCst)
                    || pending.request_id != request_id
                    || pending.survey_id != survey_id
                {
                    return;
                }
                self.pending_comments = None;
                match result {
                    Ok(comments) => {
                        self.comment_counts.insert(survey_id, comments.len() as i64);
                        self.comments.insert(survey_id, comments);
                    }
                    Err(err) => {
                        self.status_message = format!("Failed to load comments: {err}");
                    }
                }
            }
            AsyncResponse::CommentCount { survey_id, result } => {
                if let Ok(count) = result {
                    self.comment_counts.insert(survey_id, count);
                }
            }
            AsyncResponse::VoteResult { survey_id: _, result } => {
                if let Some(form) = self.vote_form.as_mut() {
                    form.in_progress = false;
                }
                match result {
                    Ok(receipt) => {
                        self.vote_form = None;
                        self.sync_screen_focus();
                        let mut message = String::from("Vote recorded");
                        if let Some(points) = receipt.points {
                            message.push_str(&format!(" · {points} pts"));
                        }
                        if let Some(balance) = receipt.balance {
                            message.push_str(&format!(" · balance {balance}"));
                        }
                        if let Some(streak) = receipt.streak {
                            message.push_str(&format!(" · {streak}-day streak"));
                        }
                        self.status_message = message;
                        self.feed_cache.remove(&FeedTab::Available);
                        self.feed_cache.remove(&FeedTab::Voted);
                        let _ = self.reload_feed(true);
                        self.queue_profile_refresh();
                        self.queue_gamification_refresh();
                    }
                    Err(err) => {
                        if let Some(form) = self.vote_form.as_mut() {
                            form.status = format!("Vote failed: {err}");
                        } else {
                            self.status_message = format!("Vote failed: {err}");
                        }
                    }
                }
            }
            AsyncResponse::CommentPosted { survey_id, result } => {
                if let Some(form) = self.comment_form.as_mut() {
                    form.in_progress = false;
                }
                match result {
                    Ok(comment) => {
                        self.comment_form = None;
                        self.sync_screen_focus();
                        self.comments.entry(survey_id).or_default().push(comment);
                        let count = self
                            .comment_counts
                            .get(&survey_id)
                            .copied()
                            .unwrap_or_default();
                        self.comment_counts.insert(survey_id, count + 1);
                        self.status_message = "Comment posted.".to_string();
                    }
                    Err(err) => {
                        if let Some(form) = self.comment_form.as_mut() {
                            form.status = format!("Comment failed: {err}");
                        } else {
                            self.status_message = format!("Comment failed: {err}");
                        }
                    }
                }
            }
            AsyncResponse::Login { result } => {
                self.login_form.in_progress = false;
                match result {
                    Ok(name) => {
                        self.login_form = LoginForm::default();
                        self.menu_screen = MenuScreen::Root;
                        self.status_message = format!("Signed in as {name}.");
                        self.feed_cache.clear();
                        self.results.clear();
                        self.comments.clear();
                        self.comment_counts.clear();
                        if let Err(err) = self.setup_authenticated_services() {
                            self.status_message = format!("Failed to set up session: {err}");
                        } else {
                            let _ = self.reload_feed(true);
                            self.queue_profile_refresh();
                        }
                    }
                    Err(err) => {
                        self.login_form.status = format!("Login failed: {err}");
                    }
                }
            }
            AsyncResponse::Register { result } => {
                self.register_form.in_progress = false;
                match result {
                    Ok(name) => {
                        self.register_form = RegisterForm::default();
                        self.menu_screen = MenuScreen::Login;
                        self.login_form.status =
                            format!("Account for {name} created. Sign in to continue.");
                    }
                    Err(err) => {
                        self.register_form.status = format!("Registration failed: {err}");
                    }
                }
            }
            AsyncResponse::Profile { result } => match result {
                Ok(me) => {
                    self.profile = Some(me);
                }
                Err(err) => {
                    debug_log(format!("profile refresh failed: {err}"));
                }
            },
            AsyncResponse::Gamification { result } => match result {
                Ok(status) => {
                    self.gamification = Some(status);
                }
                Err(err) => {
                    debug_log(format!("gamification refresh failed: {err}"));
                }
            },
            AsyncResponse::Update { result } => {
                self.update_checked = true;
                if let Ok(Some(info)) = result {
                    self.status_message = format!(
                        "Update available: {} -> {} ({})",
                        self.current_version, info.version, info.release_url
                    );
                    self.update_notice = Some(info);
                }
            }
        }
    }

    fn queue_comment_count_for_selection(&mut self) {
        let Some(service) = self.comment_service.clone() else {
            return;
        };
        let Some(card) = self.selected_card() else {
            return;
        };
        let survey_id = card.survey.id;
        if self.comment_counts.contains_key(&survey_id) {
            return;
        }
        let tx = self.response_tx.clone();
        thread::spawn(move || {
            let result = service.comment_count(survey_id);
            let _ = tx.send(AsyncResponse::CommentCount { survey_id, result });
        });
    }

    fn load_comments_for_selection(&mut self) {
        let Some(service) = self.comment_service.clone() else {
            self.status_message = "Sign in to read comments.".to_string();
            return;
        };
        let Some(card) = self.selected_card() else {
            return;
        };
        let survey_id = card.survey.id;
        if let Some(pending) = self.pending_comments.take() {
            pending.cancel_flag.store(true, Ordering::SeqCst);
        }
        let request_id = self.next_id();
        let cancel_flag = Arc::new(AtomicBool::new(false));
        self.pending_comments = Some(PendingComments {
            request_id,
            survey_id,
            cancel_flag: cancel_flag.clone(),
        });
        let tx = self.response_tx.clone();
        thread::spawn(move || {
            if cancel_flag.load(Ordering::SeqCst) {
                return;
            }
            let result = service.load_comments(survey_id);
            if cancel_flag.load(Ordering::SeqCst) {
                return;
            }
            let _ = tx.send(AsyncResponse::Comments {
                request_id,
                survey_id,
                result,
            });
        });
        self.focused_pane = Pane::Content;
        self.mark_dirty();
    }

    fn load_results_for_selection(&mut self) {
        let Some(service) = self.results_service.clone() else {
            self.status_message = "Sign in to view results.".to_string();
            return;
        };
        let Some(card) = self.selected_card() else {
            return;
        };
        let survey_id = card.survey.id;
        if self.results.contains_key(&survey_id) {
            self.focused_pane = Pane::Content;
            self.mark_dirty();
            return;
        }
        let request_id = self.next_id();
        self.pending_results = Some(PendingResults {
            request_id,
            survey_id,
        });
        let tx = self.response_tx.clone();
        thread::spawn(move || {
            let result = service.load_results(survey_id);
            let _ = tx.send(AsyncResponse::Results {
                request_id,
                survey_id,
                result,
            });
        });
        self.focused_pane = Pane::Content;
        self.mark_dirty();
    }

    fn queue_profile_refresh(&mut self) {
        let Some(service) = self.profile_service.clone() else {
            return;
        };
        let tx = self.response_tx.clone();
        thread::spawn(move || {
            let result = service.me();
            let _ = tx.send(AsyncResponse::Profile { result });
        });
    }

    fn queue_gamification_refresh(&mut self) {
        let Some(service) = self.profile_service.clone() else {
            return;
        };
        let tx = self.response_tx.clone();
        thread::spawn(move || {
            let result = service.gamification();
            let _ = tx.send(AsyncResponse::Gamification { result });
        });
    }

    fn queue_update_check(&mut self) {
        if self.update_checked {
            return;
        }
        if std::env::var(update::SKIP_UPDATE_ENV).is_ok() {
            self.update_checked = true;
            return;
        }
        let current = self.current_version.clone();
        let tx = self.response_tx.clone();
        thread::spawn(move || {
            let result = update::check_for_update(&current);
            let _ = tx.send(AsyncResponse::Update { result });
        });
    }

    // ---- actions -----------------------------------------------------------------

    fn open_vote_form(&mut self) {
        if self.interaction_service.is_none() {
            self.status_message = "Sign in to vote (press a).".to_string();
            self.mark_dirty();
            return;
        }
        let Some(card) = self.selected_card() else {
            return;
        };
        if card.survey.questions.is_empty() {
            self.status_message = "This survey has no questions.".to_string();
            self.mark_dirty();
            return;
        }
        self.vote_form = Some(VoteForm::new(&card.survey));
        self.sync_screen_focus();
        self.mark_dirty();
    }

    fn submit_vote(&mut self) {
        let Some(service) = self.interaction_service.clone() else {
            return;
        };
        let Some(form) = self.vote_form.as_mut() else {
            return;
        };
        if form.in_progress {
            return;
        }
        if !form.complete() {
            form.status = "Answer every question before submitting.".to_string();
            self.mark_dirty();
            return;
        }
        form.in_progress = true;
        form.status = "Submitting vote...".to_string();
        let survey_id = form.survey_id;
        let answers = form.answers();
        let tx = self.response_tx.clone();
        thread::spawn(move || {
            let result = service.vote(survey_id, &answers);
            let _ = tx.send(AsyncResponse::VoteResult { survey_id, result });
        });
        self.mark_dirty();
    }

    fn open_comment_form(&mut self) {
        if self.interaction_service.is_none() {
            self.status_message = "Sign in to comment (press a).".to_string();
            self.mark_dirty();
            return;
        }
        let Some(card) = self.selected_card() else {
            return;
        };
        self.comment_form = Some(CommentForm {
            survey_id: card.survey.id,
            ..CommentForm::default()
        });
        self.sync_screen_focus();
        self.mark_dirty();
    }

    fn submit_comment(&mut self) {
        let Some(service) = self.interaction_service.clone() else {
            return;
        };
        let Some(form) = self.comment_form.as_mut() else {
            return;
        };
        if form.in_progress {
            return;
        }
        if form.text.trim().is_empty() {
            form.status = "Comment text is required.".to_string();
            self.mark_dirty();
            return;
        }
        form.in_progress = true;
        form.status = "Posting...".to_string();
        let survey_id = form.survey_id;
        let text = form.text.clone();
        let tx = self.response_tx.clone();
        thread::spawn(move || {
            let result = service.comment(survey_id, &text);
            let _ = tx.send(AsyncResponse::CommentPosted { survey_id, result });
        });
        self.mark_dirty();
    }

    fn open_selected_media(&mut self) {
        let Some(card) = self.selected_card() else {
            return;
        };
        match card.item.media.as_ref() {
            Some(MediaRef::EmbedVideo { video_id }) => {
                let url = format!("https://www.youtube.com/watch?v={video_id}");
                match webbrowser::open(&url) {
                    Ok(_) => self.status_message = "Opened embed video in browser.".to_string(),
                    Err(err) => self.status_message = format!("Failed to open browser: {err}"),
                }
            }
            Some(MediaRef::LocalVideo { url }) => {
                let Some(source) = VideoSource::new(url, &card.survey.title) else {
                    return;
                };
                match player::spawn_external_player(player::ExternalLaunchOptions {
                    mpv_path: &self.mpv_path,
                    source: &source,
                    user_agent: &self.user_agent,
                    muted: self.coordinator.global_muted(),
                }) {
                    Ok(()) => self.status_message = "Opened video in mpv.".to_string(),
                    Err(err) => self.status_message = format!("Failed to launch mpv: {err}"),
                }
            }
            Some(MediaRef::Image { url }) => match webbrowser::open(url) {
                Ok(_) => self.status_message = "Opened image in browser.".to_string(),
                Err(err) => self.status_message = format!("Failed to open browser: {err}"),
            },
            None => {
                self.status_message = "No media content available.".to_string();
            }
        }
        self.mark_dirty();
    }

    fn submit_login(&mut self) {
        let Some(manager) = self.session_manager.clone() else {
            self.login_form.status = "Session manager unavailable.".to_string();
            return;
        };
        if self.login_form.in_progress {
            return;
        }
        let email = self.login_form.email.trim().to_string();
        let password = self.login_form.password.clone();
        if email.is_empty() || password.is_empty() {
            self.login_form.status = "Email and password are required.".to_string();
            return;
        }
        self.login_form.in_progress = true;
        self.login_form.status = "Signing in...".to_string();
        let tx = self.response_tx.clone();
        thread::spawn(move || {
            let result = manager
                .login(&email, &password)
                .map(|session| session.account.display_name);
            let _ = tx.send(AsyncResponse::Login { result });
        });
    }

    fn submit_register(&mut self) {
        let Some(manager) = self.session_manager.clone() else {
            self.register_form.status = "Session manager unavailable.".to_string();
            return;
        };
        if self.register_form.in_progress {
            return;
        }
        let name = self.register_form.name.trim().to_string();
        let email = self.register_form.email.trim().to_string();
        let password = self.register_form.password.clone();
        if name.is_empty() || email.is_empty() || password.is_empty() {
            self.register_form.status = "All fields are required.".to_string();
            return;
        }
        self.register_form.in_progress = true;
        self.register_form.status = "Creating account...".to_string();
        let tx = self.response_tx.clone();
        thread::spawn(move || {
            let request = api::RegisterRequest {
                name: name.clone(),
                surname: None,
                email,
                password,
            };
            let result = manager.register(&request).map(|user| user.name);
            let _ = tx.send(AsyncResponse::Register { result });
        });
    }

    /// Rebuild the data services against the active session's token. Called
    /// after a successful in-app login; at startup the composition root does
    /// the same wiring.
    fn setup_authenticated_services(&mut self) -> Result<()> {
        let Some(manager) = self.session_manager.clone() else {
            return Ok(());
        };
        let provider = manager.active_token_provider()?;
        let client = Arc::new(api::Client::new(
            provider,
            api::ClientConfig {
                user_agent: self.user_agent.clone(),
                base_url: Some(self.api_base_url.clone()),
                http_client: None,
            },
        )?);
        self.feed_service = Some(Arc::new(data::ApiFeedService::new(client.clone())));
        self.results_service = Some(Arc::new(data::ApiResultsService::new(client.clone())));
        self.comment_service = Some(Arc::new(data::ApiCommentService::new(client.clone())));
        self.interaction_service = Some(Arc::new(data::ApiInteractionService::new(client.clone())));
        self.profile_service = Some(Arc::new(data::ApiProfileService::new(client)));
        Ok(())
    }

    // ---- key handling ------------------------------------------------------------

    fn handle_key(&mut self, code: KeyCode) -> Result<bool> {
        if self.vote_form.is_some() {
            return self.handle_vote_key(code);
        }
        if self.comment_form.is_some() {
            return self.handle_comment_key(code);
        }
        if self.menu_visible {
            return self.handle_menu_key(code);
        }

        match code {
            KeyCode::Char('q') => return Ok(true),
            KeyCode::Char('j') | KeyCode::Down => self.navigate(1),
            KeyCode::Char('k') | KeyCode::Up => self.navigate(-1),
            KeyCode::Char('h') | KeyCode::Left => {
                self.focused_pane = self.focused_pane.previous();
                self.mark_dirty();
            }
            KeyCode::Char('l') | KeyCode::Right | KeyCode::Tab => {
                self.focused_pane = self.focused_pane.next();
                self.mark_dirty();
            }
            KeyCode::Char('1') => {
                self.nav_index = 0;
                self.commit_tab_selection()?;
            }
            KeyCode::Char('2') => {
                self.nav_index = 1;
                self.commit_tab_selection()?;
            }
            KeyCode::Char('3') => {
                self.nav_index = 2;
                self.commit_tab_selection()?;
            }
            KeyCode::Enter => match self.focused_pane {
                Pane::Navigation => self.commit_tab_selection()?,
                Pane::Surveys | Pane::Content => match self.tab {
                    FeedTab::Available => self.open_vote_form(),
                    FeedTab::Voted | FeedTab::Finished => self.load_results_for_selection(),
                },
            },
            KeyCode::Char('r') => self.reload_feed(true)?,
            KeyCode::Char('m') => self.toggle_mute(),
            KeyCode::Char('c') => self.load_comments_for_selection(),
            KeyCode::Char('o') => self.open_comment_form(),
            KeyCode::Char('v') => self.open_selected_media(),
            KeyCode::Char('a') => {
                self.menu_visible = true;
                self.menu_screen = MenuScreen::Root;
                self.queue_profile_refresh();
                self.queue_gamification_refresh();
                self.sync_screen_focus();
                self.mark_dirty();
            }
            _ => {}
        }
        Ok(false)
    }

    fn handle_vote_key(&mut self, code: KeyCode) -> Result<bool> {
        let Some(form) = self.vote_form.as_mut() else {
            return Ok(false);
        };
        match code {
            KeyCode::Esc => {
                self.vote_form = None;
                self.sync_screen_focus();
            }
            KeyCode::Char('j') | KeyCode::Down => {
                if let Some(question) = form.current_question() {
                    let count = question.options.len();
                    if count > 0 {
                        form.option_index = (form.option_index + 1) % count;
                    }
                }
            }
            KeyCode::Char('k') | KeyCode::Up => {
                if let Some(question) = form.current_question() {
                    let count = question.options.len();
                    if count > 0 {
                        form.option_index = (form.option_index + count - 1) % count;
                    }
                }
            }
            KeyCode::Char(' ') => {
                form.select_current();
                if form.question_index + 1 < form.questions.len() {
                    form.question_index += 1;
                    form.option_index = 0;
                }
            }
            KeyCode::Tab | KeyCode::Char('n') => {
                if !form.questions.is_empty() {
                    form.question_index = (form.question_index + 1) % form.questions.len();
                    form.option_index = 0;
                }
            }
            KeyCode::Enter => {
                if form.complete() {
                    self.submit_vote();
                } else {
                    form.select_current();
                    if form.question_index + 1 < form.questions.len() {
                        form.question_index += 1;
                        form.option_index = 0;
                    } else if form.complete() {
                        self.submit_vote();
                    }
                }
            }
            _ => {}
        }
        self.mark_dirty();
        Ok(false)
    }

    fn handle_comment_key(&mut self, code: KeyCode) -> Result<bool> {
        let Some(form) = self.comment_form.as_mut() else {
            return Ok(false);
        };
        match code {
            KeyCode::Esc => {
                self.comment_form = None;
                self.sync_screen_focus();
            }
            KeyCode::Enter => self.submit_comment(),
            KeyCode::Backspace => {
                form.text.pop();
            }
            KeyCode::Char(ch) => {
                if form.text.len() < 500 {
                    form.text.push(ch);
                }
            }
            _ => {}
        }
        self.mark_dirty();
        Ok(false)
    }

    fn handle_menu_key(&mut self, code: KeyCode) -> Result<bool> {
        match self.menu_screen {
            MenuScreen::Root => match code {
                KeyCode::Esc | KeyCode::Char('a') => {
                    self.menu_visible = false;
                    self.sync_screen_focus();
                }
                KeyCode::Char('q') => return Ok(true),
                KeyCode::Char('l') => {
                    self.menu_screen = MenuScreen::Login;
                    self.login_form.status = String::new();
                }
                KeyCode::Char('n') => {
                    self.menu_screen = MenuScreen::Register;
                    self.register_form.status = String::new();
                }
                KeyCode::Char('o') => {
                    if let Some(manager) = self.session_manager.clone() {
                        manager.logout()?;
                        self.profile = None;
                        self.gamification = None;
                        self.feed_service = None;
                        self.results_service = None;
                        self.comment_service = None;
                        self.interaction_service = None;
                        self.profile_service = None;
                        self.feed_cache.clear();
                        self.apply_feed(Vec::new());
                        self.status_message = "Signed out.".to_string();
                    }
                }
                _ => {}
            },
            MenuScreen::Login => match code {
                KeyCode::Esc => self.menu_screen = MenuScreen::Root,
                KeyCode::Tab | KeyCode::Down => {
                    self.login_form.focus = (self.login_form.focus + 1) % 2;
                }
                KeyCode::Up => {
                    self.login_form.focus = (self.login_form.focus + 1) % 2;
                }
                KeyCode::Enter => self.submit_login(),
                KeyCode::Backspace => {
                    let field = login_field_mut(&mut self.login_form);
                    field.pop();
                }
                KeyCode::Char(ch) => {
                    let field = login_field_mut(&mut self.login_form);
                    field.push(ch);
                }
                _ => {}
            },
            MenuScreen::Register => match code {
                KeyCode::Esc => self.menu_screen = MenuScreen::Root,
                KeyCode::Tab | KeyCode::Down => {
                    self.register_form.focus = (self.register_form.focus + 1) % 3;
                }
                KeyCode::Up => {
                    self.register_form.focus = (self.register_form.focus + 2) % 3;
                }
                KeyCode::Enter => self.submit_register(),
                KeyCode::Backspace => {
                    let field = register_field_mut(&mut self.register_form);
                    field.pop();
                }
                KeyCode::Char(ch) => {
                    let field = register_field_mut(&mut self.register_form);
                    field.push(ch);
                }
                _ => {}
            },
        }
        self.mark_dirty();
        Ok(false)
    }

    // ---- drawing -----------------------------------------------------------------

    fn draw(&mut self, frame: &mut Frame<'_>) {
        let size = frame.size();
        let rows = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Min(3), Constraint::Length(2)])
            .split(size);

        let panes = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([
                Constraint::Length(18),
                Constraint::Percentage(55),
                Constraint::Min(24),
            ])
            .split(rows[0]);

        self.draw_navigation(frame, panes[0]);
        self.draw_surveys(frame, panes[1]);
        self.draw_content(frame, panes[2]);
        self.draw_footer(frame, rows[1]);

        if self.menu_visible {
            self.draw_menu(frame, size);
        }
        if self.vote_form.is_some() {
            self.draw_vote_form(frame, size);
        }
        if self.comment_form.is_some() {
            self.draw_comment_form(frame, size);
        }
    }

    fn pane_block(&self, pane: Pane) -> Block<'static> {
        let style = if self.focused_pane == pane && !self.overlay_open() {
            Style::default().fg(Color::Cyan)
        } else {
            Style::default().fg(Color::DarkGray)
        };
        Block::default()
            .borders(Borders::ALL)
            .border_style(style)
            .title(pane.title())
    }

    fn draw_navigation(&mut self, frame: &mut Frame<'_>, area: Rect) {
        let mut lines = Vec::new();
        for (index, tab) in FeedTab::ALL.iter().enumerate() {
            let marker = if *tab == self.tab { "●" } else { " " };
            let label = truncate_to_width(
                &format!("{marker} {}", tab.display_name()),
                area.width.saturating_sub(2) as usize,
            );
            let style = if index == self.nav_index && self.focused_pane == Pane::Navigation {
                Style::default()
                    .fg(Color::Black)
                    .bg(Color::Cyan)
                    .add_modifier(Modifier::BOLD)
            } else if *tab == self.tab {
                Style::default().add_modifier(Modifier::BOLD)
            } else {
                Style::default()
            };
            lines.push(Line::from(Span::styled(label, style)));
        }
        lines.push(Line::from(""));
        let session_label = self
            .session_manager
            .as_ref()
            .and_then(|manager| manager.active())
            .map(|session| session.account.display_name)
            .unwrap_or_else(|| "anonymous".to_string());
        lines.push(Line::from(Span::styled(
            truncate_to_width(&session_label, area.width.saturating_sub(2) as usize),
            Style::default().fg(Color::DarkGray),
        )));
        let mute_label = if self.coordinator.global_muted() {
            "muted"
        } else {
            "sound on"
        };
        lines.push(Line::from(Span::styled(
            mute_label,
            Style::default().fg(Color::DarkGray),
        )));

        let widget = Paragraph::new(Text::from(lines)).block(self.pane_block(Pane::Navigation));
        frame.render_widget(widget, area);
    }

    fn draw_surveys(&mut self, frame: &mut Frame<'_>, area: Rect) {
        self.surveys_area = Some(area);
        let inner_width = area.width.saturating_sub(2) as usize;
        self.heights
            .set_container_width(inner_width as f64 * CELL_PX_W);
        self.request_probes();

        let mut lines: Vec<Line<'static>> = Vec::new();
        let mut heights = Vec::with_capacity(self.cards.len());
        self.active_media_rect = None;
        let active_id = self.coordinator.active_id();

        for (index, card) in self.cards.iter().enumerate() {
            let selected = index == self.selected;
            let media_rows = media_rows_for(&self.heights, &card.item);
            let card_lines = build_card_lines(
                card,
                inner_width,
                selected,
                media_rows,
                active_id == Some(card.item.id),
                self.coordinator.global_muted(),
                self.comment_counts.get(&card.survey.id).copied(),
            );
            let card_height = card_lines.len() + 1;
            // Track where the media block of the active card lands so the
            // inline player can be pinned over it.
            if active_id == Some(card.item.id) && media_rows > 0 {
                let start: usize = heights.iter().sum();
                let media_line = start + 1; // media block sits under the title
                let y_offset = media_line as i64 - self.scroll_row as i64;
                if y_offset >= 0 && (y_offset as u16) < area.height.saturating_sub(2) {
                    self.active_media_rect = Some(Rect {
                        x: area.x + 1,
                        y: area.y + 1 + y_offset as u16,
                        width: area.width.saturating_sub(2),
                        height: media_rows.min(u16::MAX as usize) as u16,
                    });
                }
            }
            heights.push(card_height);
            lines.extend(card_lines);
            lines.push(Line::from(""));
        }
        self.card_heights = heights;

        if self.cards.is_empty() {
            lines.push(Line::from(""));
            for wrapped in textwrap::wrap(&self.fallback_content, inner_width.max(10)) {
                lines.push(Line::from(wrapped.into_owned()));
            }
        }

        let widget = Paragraph::new(Text::from(lines))
            .block(self.pane_block(Pane::Surveys))
            .scroll((self.scroll_row as u16, 0));
        frame.render_widget(widget, area);
    }

    fn draw_content(&mut self, frame: &mut Frame<'_>, area: Rect) {
        let inner_width = area.width.saturating_sub(2) as usize;
        let mut lines: Vec<Line<'static>> = Vec::new();

        if let Some(card) = self.selected_card() {
            lines.push(Line::from(Span::styled(
                card.survey.title.clone(),
                Style::default().add_modifier(Modifier::BOLD),
            )));
            if let Some(description) = card.survey.description.as_deref() {
                for wrapped in textwrap::wrap(description, inner_width.max(10)) {
                    lines.push(Line::from(wrapped.into_owned()));
                }
            }
            lines.push(Line::from(""));

            if let Some(results) = self.results.get(&card.survey.id) {
                lines.extend(result_lines(results, inner_width));
            } else if self.tab != FeedTab::Available {
                lines.push(Line::from(Span::styled(
                    "Press Enter to load results.",
                    Style::default().fg(Color::DarkGray),
                )));
            } else {
                lines.extend(question_lines(&card.survey));
            }

            lines.push(Line::from(""));
            let count = self
                .comment_counts
                .get(&card.survey.id)
                .copied()
                .unwrap_or_default();
            lines.push(Line::from(Span::styled(
                format!("Comments ({count}) — press c to load, o to write"),
                Style::default().fg(Color::Blue),
            )));
            if let Some(comments) = self.comments.get(&card.survey.id) {
                for comment in comments {
                    for (index, wrapped) in textwrap::wrap(&comment.content, inner_width.max(10))
                        .into_iter()
                        .enumerate()
                    {
                        let prefix = if index == 0 { "· " } else { "  " };
                        lines.push(Line::from(format!("{prefix}{wrapped}")));
                    }
                }
            }
        } else {
            for wrapped in textwrap::wrap(&self.fallback_content, inner_width.max(10)) {
                lines.push(Line::from(wrapped.into_owned()));
            }
        }

        let widget = Paragraph::new(Text::from(lines)).block(self.pane_block(Pane::Content));
        frame.render_widget(widget, area);
    }

    fn draw_footer(&mut self, frame: &mut Frame<'_>, area: Rect) {
        let spinner = if self.is_loading() {
            format!("{} ", self.spinner.frame())
        } else {
            String::new()
        };
        let notice = match self.update_notice.as_ref() {
            Some(info) => format!(" · update {} available", info.version),
            None => String::new(),
        };
        let status = Line::from(format!("{spinner}{}{notice}", self.status_message));
        let keys = Line::from(Span::styled(
            "j/k navigate · 1/2/3 tabs · Enter vote/results · c comments · o comment · m mute · v open media · a account · r refresh · q quit",
            Style::default().fg(Color::DarkGray),
        ));
        let widget = Paragraph::new(Text::from(vec![status, keys]));
        frame.render_widget(widget, area);
    }

    fn draw_menu(&mut self, frame: &mut Frame<'_>, size: Rect) {
        let area = centered_rect(60, 70, size);
        frame.render_widget(Clear, area);
        let inner_width = area.width.saturating_sub(2) as usize;

        let mut lines: Vec<Line<'static>> = Vec::new();
        match self.menu_screen {
            MenuScreen::Root => {
                lines.push(Line::from(Span::styled(
                    "Account",
                    Style::default().add_modifier(Modifier::BOLD),
                )));
                lines.push(Line::from(format!("config: {}", self.config_path)));
                lines.push(Line::from(""));
                match (&self.profile, self.session_manager.as_ref()) {
                    (Some(me), _) => {
                        lines.push(Line::from(format!(
                            "{} <{}>",
                            me.user.name, me.user.email
                        )));
                        // Prefer the live gamification status; /me carries a
                        // snapshot that can lag a vote receipt.
                        match (self.gamification.as_ref(), me.public_profile.as_ref()) {
                            (Some(status), _) => {
                                lines.push(Line::from(format!(
                                    "level {} · {} pts · {}-day streak",
                                    status.level, status.points, status.streak_days
                                )));
                            }
                            (None, Some(profile)) => {
                                lines.push(Line::from(format!(
                                    "level {} · {} pts · {}-day streak",
                                    profile.level, profile.points, profile.streak_days
                                )));
                            }
                            (None, None) => {}
                        }
                        if let Some(wallet) = me.wallet.as_ref() {
                            lines.push(Line::from(format!("wallet balance: {}", wallet.balance)));
                            for movement in wallet.movements.iter().rev().take(5) {
                                lines.push(Line::from(Span::styled(
                                    format!("  {} {}", movement.kind, movement.amount),
                                    Style::default().fg(Color::DarkGray),
                                )));
                            }
                        }
                        if !me.achievements.is_empty() {
                            lines.push(Line::from(""));
                            lines.push(Line::from(Span::styled(
                                "Achievements",
                                Style::default().add_modifier(Modifier::BOLD),
                            )));
                            for earned in &me.achievements {
                                let label = match earned.achievement.description.as_deref() {
                                    Some(desc) => {
                                        format!("· {} — {desc}", earned.achievement.name)
                                    }
                                    None => format!("· {}", earned.achievement.name),
                                };
                                lines.push(Line::from(truncate_to_width(&label, inner_width)));
                            }
                        }
                    }
                    (None, Some(manager)) if manager.active().is_some() => {
                        lines.push(Line::from("Loading profile..."));
                    }
                    _ => {
                        lines.push(Line::from("Not signed in."));
                    }
                }
                lines.push(Line::from(""));
                lines.push(Line::from(Span::styled(
                    "l sign in · n new account · o sign out · Esc close",
                    Style::default().fg(Color::DarkGray),
                )));
            }
            MenuScreen::Login => {
                lines.push(Line::from(Span::styled(
                    "Sign in",
                    Style::default().add_modifier(Modifier::BOLD),
                )));
                lines.push(Line::from(""));
                lines.push(form_field_line("Email", &self.login_form.email, self.login_form.focus == 0, false));
                lines.push(form_field_line(
                    "Password",
                    &self.login_form.password,
                    self.login_form.focus == 1,
                    true,
                ));
                lines.push(Line::from(""));
                lines.push(Line::from(self.login_form.status.clone()));
                lines.push(Line::from(Span::styled(
                    "Tab next field · Enter submit · Esc back",
                    Style::default().fg(Color::DarkGray),
                )));
            }
            MenuScreen::Register => {
                lines.push(Line::from(Span::styled(
                    "Create account",
                    Style::default().add_modifier(Modifier::BOLD),
                )));
                lines.push(Line::from(""));
                lines.push(form_field_line("Name", &self.register_form.name, self.register_form.focus == 0, false));
                lines.push(form_field_line(
                    "Email",
                    &self.register_form.email,
                    self.register_form.focus == 1,
                    false,
                ));
                lines.push(form_field_line(
                    "Password",
                    &self.register_form.password,
                    self.register_form.focus == 2,
                    true,
                ));
                lines.push(Line::from(""));
                lines.push(Line::from(self.register_form.status.clone()));
                lines.push(Line::from(Span::styled(
                    "Tab next field · Enter submit · Esc back",
                    Style::default().fg(Color::DarkGray),
                )));
            }
        }

        let widget = Paragraph::new(Text::from(lines))
            .block(Block::default().borders(Borders::ALL).title("Menu"));
        frame.render_widget(widget, area);
    }

    fn draw_vote_form(&mut self, frame: &mut Frame<'_>, size: Rect) {
        let Some(form) = self.vote_form.as_ref() else {
            return;
        };
        let area = centered_rect(70, 70, size);
        frame.render_widget(Clear, area);
        let inner_width = area.width.saturating_sub(2) as usize;

        let mut lines: Vec<Line<'static>> = Vec::new();
        lines.push(Line::from(Span::styled(
            truncate_to_width(&form.title, inner_width),
            Style::default().add_modifier(Modifier::BOLD),
        )));
        lines.push(Line::from(format!(
            "Question {}/{}",
            form.question_index + 1,
            form.questions.len()
        )));
        lines.push(Line::from(""));

        if let Some(question) = form.current_question() {
            for wrapped in textwrap::wrap(&question.text, inner_width.max(10)) {
                lines.push(Line::from(wrapped.into_owned()));
            }
            lines.push(Line::from(""));
            let chosen = form.selections.get(&question.id).copied();
            for (index, option) in question.options.iter().enumerate() {
                let marker = if chosen == Some(option.id) {
                    "[x]"
                } else {
                    "[ ]"
                };
                let style = if index == form.option_index {
                    Style::default().fg(Color::Black).bg(Color::Cyan)
                } else {
                    Style::default()
                };
                lines.push(Line::from(Span::styled(
                    truncate_to_width(&format!("{marker} {}", option.text), inner_width),
                    style,
                )));
            }
        }

        lines.push(Line::from(""));
        lines.push(Line::from(form.status.clone()));
        lines.push(Line::from(Span::styled(
            "j/k option · space select · Tab question · Enter submit · Esc cancel",
            Style::default().fg(Color::DarkGray),
        )));

        let widget = Paragraph::new(Text::from(lines))
            .block(Block::default().borders(Borders::ALL).title("Vote"));
        frame.render_widget(widget, area);
    }

    fn draw_comment_form(&mut self, frame: &mut Frame<'_>, size: Rect) {
        let Some(form) = self.comment_form.as_ref() else {
            return;
        };
        let area = centered_rect(60, 40, size);
        frame.render_widget(Clear, area);
        let inner_width = area.width.saturating_sub(2) as usize;

        let mut lines: Vec<Line<'static>> = Vec::new();
        lines.push(Line::from(Span::styled(
            "Write a comment",
            Style::default().add_modifier(Modifier::BOLD),
        )));
        lines.push(Line::from(""));
        for wrapped in textwrap::wrap(&format!("{}_", form.text), inner_width.max(10)) {
            lines.push(Line::from(wrapped.into_owned()));
        }
        lines.push(Line::from(""));
        lines.push(Line::from(form.status.clone()));
        lines.push(Line::from(Span::styled(
            "Enter post · Esc cancel",
            Style::default().fg(Color::DarkGray),
        )));

        let widget = Paragraph::new(Text::from(lines))
            .block(Block::default().borders(Borders::ALL).title("Comment"));
        frame.render_widget(widget, area);
    }
}

fn login_field_mut(form: &mut LoginForm) -> &mut String {
    if form.focus == 0 {
        &mut form.email
    } else {
        &mut form.password
    }
}

fn register_field_mut(form: &mut RegisterForm) -> &mut String {
    match form.focus {
        0 => &mut form.name,
        1 => &mut form.email,
        _ => &mut form.password,
    }
}

fn form_field_line(label: &str, value: &str, focused: bool, masked: bool) -> Line<'static> {
    let shown = if masked {
        "*".repeat(value.chars().count())
    } else {
        value.to_string()
    };
    let cursor = if focused { "_" } else { "" };
    let style = if focused {
        Style::default().add_modifier(Modifier::BOLD)
    } else {
        Style::default()
    };
    Line::from(Span::styled(format!("{label}: {shown}{cursor}"), style))
}

fn inline_video_supported() -> bool {
    if std::env::var("KITTY_WINDOW_ID").is_ok() {
        return true;
    }
    std::env::var("TERM")
        .map(|term| term.contains("kitty"))
        .unwrap_or(false)
}

fn surface_geometry(rect: Rect) -> SurfaceGeometry {
    let (cell_w, cell_h) = cell_pixel_metrics();
    SurfaceGeometry {
        col: rect.x,
        row: rect.y,
        cols: rect.width as i32,
        rows: rect.height as i32,
        pixel_width: (rect.width as f64 * cell_w) as i32,
        pixel_height: (rect.height as f64 * cell_h) as i32,
    }
}

fn cell_pixel_metrics() -> (f64, f64) {
    if let Ok(size) = crossterm::terminal::window_size() {
        if size.columns > 0 && size.rows > 0 && size.width > 0 && size.height > 0 {
            return (
                size.width as f64 / size.columns as f64,
                size.height as f64 / size.rows as f64,
            );
        }
    }
    (CELL_PX_W, CELL_PX_H)
}

/// Map a probed display height in layout units onto terminal rows.
fn media_rows_for(heights: &media::HeightRegistry, item: &FeedItem) -> usize {
    match item.media.as_ref() {
        None => 0,
        Some(_) => {
            let units = heights.height_for(item.id);
            let rows = (units / CELL_PX_H).ceil() as usize;
            rows.clamp(MIN_MEDIA_ROWS, (media::MAX_MEDIA_HEIGHT / CELL_PX_H) as usize)
        }
    }
}

/// Which card ids pass the viewability threshold for the current scroll
/// position. `heights` holds each card's rendered height in rows.
fn compute_visible_ids(
    heights: &[usize],
    ids: &[i64],
    scroll_row: usize,
    viewport_rows: usize,
    threshold: f64,
) -> Vec<i64> {
    let mut visible = Vec::new();
    if viewport_rows == 0 {
        return visible;
    }
    let view_start = scroll_row;
    let view_end = scroll_row + viewport_rows;
    let mut offset = 0usize;
    for (height, id) in heights.iter().zip(ids) {
        let start = offset;
        let end = offset + height;
        offset = end;
        if *height == 0 {
            continue;
        }
        let overlap = end.min(view_end).saturating_sub(start.max(view_start));
        if overlap as f64 / *height as f64 >= threshold {
            visible.push(*id);
        }
    }
    visible
}

fn badge_text(survey: &Survey, tab: FeedTab) -> String {
    if survey.sponsored {
        let points = survey.reward_points.unwrap_or(0);
        let money = survey.reward_money.unwrap_or(0);
        let mut badge = format!("Sponsored · {points} pts / ${money}");
        if let Some(sponsor) = survey.sponsor.as_deref() {
            if !sponsor.trim().is_empty() {
                badge.push_str(&format!(" · {sponsor}"));
            }
        }
        return badge;
    }
    match tab {
        FeedTab::Available => "Available".to_string(),
        FeedTab::Voted => "Participated".to_string(),
        FeedTab::Finished => "Finished".to_string(),
    }
}

fn media_placeholder(item: &FeedItem, active: bool, muted: bool) -> Option<String> {
    match item.media.as_ref()? {
        MediaRef::Image { .. } => Some("[ image ]".to_string()),
        MediaRef::EmbedVideo { video_id } => Some(format!("[ ▶ youtube:{video_id} ]")),
        MediaRef::LocalVideo { .. } => {
            if active {
                let audio = if muted { "muted" } else { "sound" };
                Some(format!("[ ▶ playing ({audio}) ]"))
            } else {
                Some("[ ▶ video ]".to_string())
            }
        }
    }
}

fn build_card_lines(
    card: &SurveyCard,
    width: usize,
    selected: bool,
    media_rows: usize,
    active: bool,
    muted: bool,
    comment_count: Option<i64>,
) -> Vec<Line<'static>> {
    let width = width.max(10);
    let mut lines = Vec::new();

    let title_style = if selected {
        Style::default()
            .fg(Color::Black)
            .bg(Color::Cyan)
            .add_modifier(Modifier::BOLD)
    } else {
        Style::default().add_modifier(Modifier::BOLD)
    };
    lines.push(Line::from(Span::styled(
        truncate_to_width(&card.survey.title, width),
        title_style,
    )));

    match media_placeholder(&card.item, active, muted) {
        Some(label) => {
            let mid = media_rows / 2;
            for row in 0..media_rows.max(1) {
                let text = if row == mid { label.clone() } else { String::new() };
                lines.push(Line::from(Span::styled(
                    format!("{:^width$}", text),
                    Style::default().fg(Color::White).bg(Color::Black),
                )));
            }
        }
        None => {
            lines.push(Line::from(Span::styled(
                "No media content available",
                Style::default().fg(Color::DarkGray),
            )));
        }
    }

    if let Some(description) = card.survey.description.as_deref() {
        for wrapped in textwrap::wrap(description, width).into_iter().take(3) {
            lines.push(Line::from(wrapped.into_owned()));
        }
    }

    let badge_tab = if card.survey.remaining_seconds == Some(0) {
        FeedTab::Finished
    } else {
        FeedTab::Available
    };
    let mut meta = badge_text(&card.survey, badge_tab);
    if let Some(count) = comment_count {
        meta.push_str(&format!(" · {count} comments"));
    }
    lines.push(Line::from(Span::styled(
        truncate_to_width(&meta, width),
        Style::default().fg(Color::Yellow),
    )));

    if let Some(remaining) = card.remaining_seconds() {
        lines.push(Line::from(Span::styled(
            format!("Time left: {}", feed::format_countdown(remaining)),
            Style::default().fg(Color::Green),
        )));
    }

    lines
}

fn question_lines(survey: &Survey) -> Vec<Line<'static>> {
    let mut lines = Vec::new();
    for (index, question) in survey.questions.iter().enumerate() {
        lines.push(Line::from(Span::styled(
            format!("{}. {}", index + 1, question.text),
            Style::default().add_modifier(Modifier::BOLD),
        )));
        for option in &question.options {
            lines.push(Line::from(format!("   ○ {}", option.text)));
        }
    }
    if !lines.is_empty() {
        lines.push(Line::from(""));
        lines.push(Line::from(Span::styled(
            "Press Enter to vote.",
            Style::default().fg(Color::DarkGray),
        )));
    }
    lines
}

// Percentages missing from the payload are recomputed client-side before
// the bars are drawn.
fn result_lines(results: &api::SurveyResults, width: usize) -> Vec<Line<'static>> {
    let mut lines = Vec::new();
    for question in &results.results {
        lines.push(Line::from(Span::styled(
            question.question_text.clone(),
            Style::default().add_modifier(Modifier::BOLD),
        )));
        lines.push(Line::from(Span::styled(
            format!("{} votes", question.total_votes),
            Style::default().fg(Color::DarkGray),
        )));

        let counts: Vec<i64> = question.options.iter().map(|option| option.votes).collect();
        let computed = feed::vote_percentages(&counts);
        for (option, fallback) in question.options.iter().zip(computed) {
            let percentage = option.percentage.unwrap_or(fallback);
            lines.push(Line::from(format!(
                "{} — {} ({percentage:.1}%)",
                option.text, option.votes
            )));
            let bar_width = width.saturating_sub(2).max(10);
            let filled = (((percentage / 100.0) * bar_width as f64).round() as usize).min(bar_width);
            let bar: String = "█".repeat(filled) + &"░".repeat(bar_width - filled);
            lines.push(Line::from(Span::styled(bar, Style::default().fg(Color::Cyan))));
        }
        lines.push(Line::from(""));
    }
    lines
}

fn truncate_to_width(text: &str, width: usize) -> String {
    if width == 0 {
        return String::new();
    }
    if UnicodeWidthStr::width(text) <= width {
        return text.to_string();
    }
    let mut out = String::new();
    let mut used = 0;
    for ch in text.chars() {
        let ch_width = UnicodeWidthStr::width(ch.to_string().as_str());
        if used + ch_width + 1 > width {
            break;
        }
        out.push(ch);
        used += ch_width;
    }
    out.push('…');
    out
}

fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(area);
    let horizontal = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(vertical[1]);
    horizontal[1]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn survey_with_media(id: i64, media_url: Option<&str>) -> Survey {
        Survey {
            id,
            title: format!("Survey {id}"),
            description: Some("Pick your favorite.".into()),
            remaining_seconds: Some(120),
            questions: Vec::new(),
            media_url: media_url.map(str::to_string),
            media_urls: Vec::new(),
            results_visibility: api::ResultsVisibility::Public,
            sponsored: false,
            sponsor: None,
            reward_points: None,
            reward_money: None,
            budget_total: None,
        }
    }

    #[test]
    fn fully_visible_cards_pass_the_threshold() {
        let heights = vec![10, 10, 10];
        let ids = vec![1, 2, 3];
        let visible = compute_visible_ids(&heights, &ids, 0, 15, 0.5);
        // Card 1 fully visible, card 2 half visible (5/10 >= 0.5), card 3 off
        // screen entirely.
        assert_eq!(visible, vec![1, 2]);
    }

    #[test]
    fn barely_peeking_cards_are_not_visible() {
        let heights = vec![10, 10];
        let ids = vec![1, 2];
        let visible = compute_visible_ids(&heights, &ids, 6, 10, 0.5);
        // Card 1 shows 4/10 rows, card 2 shows 6/10.
        assert_eq!(visible, vec![2]);
    }

    #[test]
    fn empty_viewport_sees_nothing() {
        assert!(compute_visible_ids(&[5], &[1], 0, 0, 0.5).is_empty());
    }

    #[test]
    fn card_lines_include_countdown_and_placeholder() {
        let card = SurveyCard::new(survey_with_media(1, Some("https://cdn.test/clip.mp4")));
        let lines = build_card_lines(&card, 40, false, 3, false, false, Some(2));
        let text: Vec<String> = lines
            .iter()
            .map(|line| {
                line.spans
                    .iter()
                    .map(|span| span.content.clone().into_owned())
                    .collect::<String>()
            })
            .collect();
        assert!(text.iter().any(|line| line.contains("▶ video")));
        assert!(text.iter().any(|line| line.contains("Time left:")));
        assert!(text.iter().any(|line| line.contains("2 comments")));
    }

    #[test]
    fn active_card_shows_playing_state() {
        let card = SurveyCard::new(survey_with_media(1, Some("https://cdn.test/clip.mp4")));
        let lines = build_card_lines(&card, 40, false, 3, true, true, None);
        let text: String = lines
            .iter()
            .flat_map(|line| line.spans.iter())
            .map(|span| span.content.clone().into_owned())
            .collect();
        assert!(text.contains("playing (muted)"));
    }

    #[test]
    fn media_rows_scale_with_probed_height() {
        let mut heights = media::HeightRegistry::new(320.0);
        let item = FeedItem::new(1, Some("https://cdn.test/pic.jpg"), &[]);
        let rendered: HashSet<i64> = [1].into_iter().collect();
        heights.apply(
            &rendered,
            &media::Probe {
                item_id: 1,
                url: "https://cdn.test/pic.jpg".into(),
                outcome: Ok(media::ProbedSize {
                    natural_width: 1000,
                    natural_height: 500,
                    display_height: 160.0,
                }),
            },
        );
        // 160 units over 16px rows -> 10 rows.
        assert_eq!(media_rows_for(&heights, &item), 10);

        let no_media = FeedItem::new(2, None, &[]);
        assert_eq!(media_rows_for(&heights, &no_media), 0);
    }

    #[test]
    fn vote_form_requires_every_question() {
        let mut survey = survey_with_media(5, None);
        survey.questions = vec![
            api::Question {
                id: 1,
                text: "Q1".into(),
                options: vec![api::QuestionOption {
                    id: 10,
                    text: "A".into(),
                    count: None,
                    percentage: None,
                }],
                total_votes: None,
            },
            api::Question {
                id: 2,
                text: "Q2".into(),
                options: vec![api::QuestionOption {
                    id: 20,
                    text: "B".into(),
                    count: None,
                    percentage: None,
                }],
                total_votes: None,
            },
        ];
        let mut form = VoteForm::new(&survey);
        assert!(!form.complete());
        form.select_current();
        assert!(!form.complete());
        form.question_index = 1;
        form.option_index = 0;
        form.select_current();
        assert!(form.complete());
        let answers = form.answers();
        assert_eq!(
            answers,
            vec![
                VoteAnswer {
                    question_id: 1,
                    option_id: 10
                },
                VoteAnswer {
                    question_id: 2,
                    option_id: 20
                },
            ]
        );
    }

    #[test]
    fn truncation_respects_display_width() {
        assert_eq!(truncate_to_width("short", 10), "short");
        let truncated = truncate_to_width("a very long survey title", 10);
        assert!(UnicodeWidthStr::width(truncated.as_str()) <= 10);
        assert!(truncated.ends_with('…'));
    }
}
