use anyhow::{Context, Result};
use rand::seq::SliceRandom;
use std::sync::Arc;

use crate::api::{
    self, Comment, GamificationStatus, Me, Survey, SurveyResults, VoteAnswer, VoteReceipt,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FeedTab {
    #[default]
    Available,
    Voted,
    Finished,
}

impl FeedTab {
    pub const ALL: [FeedTab; 3] = [FeedTab::Available, FeedTab::Voted, FeedTab::Finished];

    pub fn display_name(&self) -> &'static str {
        match self {
            FeedTab::Available => "Available",
            FeedTab::Voted => "Voted",
            FeedTab::Finished => "Finished",
        }
    }
}

pub trait FeedService: Send + Sync {
    fn load_feed(&self, tab: FeedTab) -> Result<Vec<Survey>>;
}

pub trait ResultsService: Send + Sync {
    fn load_results(&self, survey_id: i64) -> Result<SurveyResults>;
}

pub trait CommentService: Send + Sync {
    fn load_comments(&self, survey_id: i64) -> Result<Vec<Comment>>;
    fn comment_count(&self, survey_id: i64) -> Result<i64>;
}

pub trait InteractionService: Send + Sync {
    fn vote(&self, survey_id: i64, answers: &[VoteAnswer]) -> Result<VoteReceipt>;
    fn comment(&self, survey_id: i64, content: &str) -> Result<Comment>;
}

pub trait ProfileService: Send + Sync {
    fn me(&self) -> Result<Me>;
    fn gamification(&self) -> Result<GamificationStatus>;
}

pub struct ApiFeedService {
    client: Arc<api::Client>,
}

impl ApiFeedService {
    pub fn new(client: Arc<api::Client>) -> Self {
        Self { client }
    }
}

impl FeedService for ApiFeedService {
    fn load_feed(&self, tab: FeedTab) -> Result<Vec<Survey>> {
        match tab {
            FeedTab::Available => self
                .client
                .surveys_available()
                .context("fetch available surveys"),
            FeedTab::Voted => self.client.surveys_voted().context("fetch voted surveys"),
            FeedTab::Finished => self
                .client
                .surveys_finished()
                .context("fetch finished surveys"),
        }
    }
}

pub struct ApiResultsService {
    client: Arc<api::Client>,
}

impl ApiResultsService {
    pub fn new(client: Arc<api::Client>) -> Self {
        Self { client }
    }
}

impl ResultsService for ApiResultsService {
    fn load_results(&self, survey_id: i64) -> Result<SurveyResults> {
        self.client
            .survey_results(survey_id)
            .context("fetch survey results")
    }
}

pub struct ApiCommentService {
    client: Arc<api::Client>,
}

impl ApiCommentService {
    pub fn new(client: Arc<api::Client>) -> Self {
        Self { client }
    }
}

impl CommentService for ApiCommentService {
    fn load_comments(&self, survey_id: i64) -> Result<Vec<Comment>> {
        self.client
            .comments_for_survey(survey_id)
            .context("fetch comments")
    }

    fn comment_count(&self, survey_id: i64) -> Result<i64> {
        self.client
            .comment_count(survey_id)
            .context("fetch comment count")
    }
}

pub struct ApiInteractionService {
    client: Arc<api::Client>,
}

impl ApiInteractionService {
    pub fn new(client: Arc<api::Client>) -> Self {
        Self { client }
    }
}

impl InteractionService for ApiInteractionService {
    fn vote(&self, survey_id: i64, answers: &[VoteAnswer]) -> Result<VoteReceipt> {
        self.client.vote(survey_id, answers)
    }

    fn comment(&self, survey_id: i64, content: &str) -> Result<Comment> {
        self.client.post_comment(survey_id, content)
    }
}

pub struct ApiProfileService {
    client: Arc<api::Client>,
}

impl ApiProfileService {
    pub fn new(client: Arc<api::Client>) -> Self {
        Self { client }
    }
}

impl ProfileService for ApiProfileService {
    fn me(&self) -> Result<Me> {
        self.client.me().context("fetch profile")
    }

    fn gamification(&self) -> Result<GamificationStatus> {
        self.client
            .gamification_status()
            .context("fetch gamification status")
    }
}

#[derive(Default)]
pub struct MockFeedService;

impl FeedService for MockFeedService {
    fn load_feed(&self, tab: FeedTab) -> Result<Vec<Survey>> {
        let mut surveys = vec![
            mock_survey(1, &format!("{} sample survey", tab.display_name())),
            mock_survey(2, "Favorite lunch spot"),
        ];
        surveys.shuffle(&mut rand::thread_rng());
        Ok(surveys)
    }
}

#[derive(Default)]
pub struct MockCommentService;

impl CommentService for MockCommentService {
    fn load_comments(&self, survey_id: i64) -> Result<Vec<Comment>> {
        Ok(vec![Comment {
            id: 1,
            survey_id,
            user_id: 1,
            content: "Comments are unavailable in this mock response.".into(),
            created_at: String::new(),
        }])
    }

    fn comment_count(&self, _survey_id: i64) -> Result<i64> {
        Ok(1)
    }
}

#[derive(Default)]
pub struct MockInteractionService;

impl InteractionService for MockInteractionService {
    fn vote(&self, survey_id: i64, _answers: &[VoteAnswer]) -> Result<VoteReceipt> {
        Ok(VoteReceipt {
            message: "Vote recorded".into(),
            survey_id,
            ..VoteReceipt::default()
        })
    }

    fn comment(&self, survey_id: i64, content: &str) -> Result<Comment> {
        Ok(Comment {
            id: 99,
            survey_id,
            user_id: 1,
            content: content.to_string(),
            created_at: String::new(),
        })
    }
}

fn mock_survey(id: i64, title: &str) -> Survey {
    Survey {
        id,
        title: title.to_string(),
        description: Some("Sample content provided for offline browsing.".into()),
        remaining_seconds: Some(3_600),
        questions: vec![api::Question {
            id: 1,
            text: "Pick one".into(),
            options: vec![
                api::QuestionOption {
                    id: 1,
                    text: "Yes".into(),
                    count: None,
                    percentage: None,
                },
                api::QuestionOption {
                    id: 2,
                    text: "No".into(),
                    count: None,
                    percentage: None,
                },
            ],
            total_votes: None,
        }],
        media_url: None,
        media_urls: Vec::new(),
        results_visibility: api::ResultsVisibility::Public,
        sponsored: false,
        sponsor: None,
        reward_points: None,
        reward_money: None,
        budget_total: None,
    }
}
