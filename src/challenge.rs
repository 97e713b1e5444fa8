//! CAPTCHA resolution state machine.
//!
//! The solver never assumes a step worked: after the checkbox click, after a
//! failed transcription and after submitting an answer it goes back to
//! [`ChallengeState::Detecting`] and re-reads the page.
//!
//! | From | Condition | To |
//! |---|---|---|
//! | Detecting | no challenge marker | Resolved |
//! | Detecting | marker, cycles left | CheckboxAttempt |
//! | Detecting | marker, cycles exhausted | Failed |
//! | CheckboxAttempt | checkbox clicked | AudioChallengeAttempt |
//! | CheckboxAttempt | no iframe / checkbox | Failed |
//! | AudioChallengeAttempt | audio button clicked | AudioDownload |
//! | AudioChallengeAttempt | no audio frame / button | Detecting |
//! | AudioDownload | download link found | Transcribe |
//! | AudioDownload | no link, block marker | Blocked |
//! | AudioDownload | no link, no block marker | Failed |
//! | Transcribe | text recognized | Submit |
//! | Transcribe | unrecognized | Detecting |
//! | Submit | answer typed (or no field) | Detecting |

use crate::error::{HindexError, Result};
use crate::pacing::Jitter;
use crate::session::{Locator, PageFetcher, Session, ENTER};
use crate::transcribe::{Transcriber, Transcription};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Any iframe of the current document
pub const FRAME: Locator = Locator::Css("iframe");
/// reCAPTCHA "I'm not a robot" checkbox
pub const CHECKBOX: Locator = Locator::Css("span.recaptcha-checkbox");
/// Button switching the challenge to its audio variant
pub const AUDIO_BUTTON: Locator = Locator::Css("#recaptcha-audio-button");
/// Download link of the audio challenge
pub const DOWNLOAD_LINK: Locator = Locator::Css("a.rc-audiochallenge-tdownload-link");
/// Answer field of the audio challenge
pub const AUDIO_RESPONSE: Locator = Locator::Css("input#audio-response");

/// Position of the challenge popup among the page's iframes
const AUDIO_FRAME_INDEX: usize = 2;

/// Page text shown while the search engine asks for verification
pub const DEFAULT_CHALLENGE_MARKERS: &[&str] = &[
    "Sorry, we can't verify that you're not a robot",
    "Please show you're not a robot",
];

/// Text shown in the challenge popup once audio challenges are refused
pub const DEFAULT_BLOCK_MARKER: &str = "automated queries";

/// Challenge detection and timing settings
#[derive(Debug, Clone)]
pub struct ChallengeConfig {
    /// How long to wait for the challenge iframe and checkbox
    pub frame_wait: Duration,
    /// How long to wait for the audio challenge controls
    pub audio_wait: Duration,
    /// Detecting passes that may find the challenge still present
    pub max_cycles: usize,
    /// Any of these in the page source means a challenge is shown
    pub markers: Vec<String>,
    /// Marker of a permanent block
    pub block_marker: String,
}

impl ChallengeConfig {
    /// Whether the page source shows a challenge
    pub fn is_challenge(&self, source: &str) -> bool {
        self.markers.iter().any(|m| source.contains(m.as_str()))
    }

    /// Whether the page source shows a permanent block
    pub fn is_blocked(&self, source: &str) -> bool {
        source.contains(self.block_marker.as_str())
    }
}

impl Default for ChallengeConfig {
    fn default() -> Self {
        Self {
            frame_wait: Duration::from_secs(20),
            audio_wait: Duration::from_secs(20),
            max_cycles: 5,
            markers: DEFAULT_CHALLENGE_MARKERS.iter().map(|m| m.to_string()).collect(),
            block_marker: DEFAULT_BLOCK_MARKER.to_string(),
        }
    }
}

/// States of the challenge resolution machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChallengeState {
    Detecting,
    CheckboxAttempt,
    AudioChallengeAttempt,
    AudioDownload,
    Transcribe { link: String },
    Submit { answer: String },
    Resolved,
    Blocked,
    Failed(String),
}

impl ChallengeState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ChallengeState::Resolved | ChallengeState::Blocked | ChallengeState::Failed(_)
        )
    }

    fn name(&self) -> &'static str {
        match self {
            ChallengeState::Detecting => "detecting",
            ChallengeState::CheckboxAttempt => "checkbox",
            ChallengeState::AudioChallengeAttempt => "audio_challenge",
            ChallengeState::AudioDownload => "audio_download",
            ChallengeState::Transcribe { .. } => "transcribe",
            ChallengeState::Submit { .. } => "submit",
            ChallengeState::Resolved => "resolved",
            ChallengeState::Blocked => "blocked",
            ChallengeState::Failed(_) => "failed",
        }
    }
}

impl fmt::Display for ChallengeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Trace of a successful resolution
#[derive(Debug, Clone, Default)]
pub struct ChallengeReport {
    /// Every state visited, in order, ending with `Resolved`
    pub path: Vec<ChallengeState>,
    /// Detecting passes that found the challenge present
    pub cycles: usize,
}

impl ChallengeReport {
    /// Whether the machine passed through the given state kind
    pub fn visited(&self, state: &ChallengeState) -> bool {
        self.path
            .iter()
            .any(|s| std::mem::discriminant(s) == std::mem::discriminant(state))
    }
}

/// Drives a blocked session back to an unblocked state
pub struct ChallengeSolver {
    fetcher: Arc<dyn PageFetcher>,
    transcriber: Arc<dyn Transcriber>,
    config: ChallengeConfig,
    jitter: Jitter,
}

impl ChallengeSolver {
    /// Create a new ChallengeSolver
    ///
    /// # Arguments
    ///
    /// * `fetcher` - Downloads the audio challenge
    /// * `transcriber` - Speech-to-text for the audio challenge
    /// * `config` - Markers and wait bounds
    pub fn new(
        fetcher: Arc<dyn PageFetcher>,
        transcriber: Arc<dyn Transcriber>,
        config: ChallengeConfig,
    ) -> Self {
        Self {
            fetcher,
            transcriber,
            config,
            jitter: Jitter::default(),
        }
    }

    /// Replace the pause policy used between challenge interactions
    pub fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn config(&self) -> &ChallengeConfig {
        &self.config
    }

    /// Run the machine until the session is unblocked.
    ///
    /// # Errors
    ///
    /// `ChallengeBlocked` when the permanent-block marker is observed,
    /// `ChallengeFailed` for any other unresolvable challenge. Either way the
    /// session must not be used for further queries.
    pub async fn solve<S: Session + ?Sized>(&self, session: &mut S) -> Result<ChallengeReport> {
        warn!("Solving captcha");
        let mut report = ChallengeReport::default();
        let mut state = ChallengeState::Detecting;

        loop {
            report.path.push(state.clone());
            match state {
                ChallengeState::Resolved => {
                    info!(cycles = report.cycles, "Captcha resolved");
                    return Ok(report);
                }
                ChallengeState::Blocked => {
                    self.reset_frame(session).await;
                    warn!("Captcha blocked, can't scrape more");
                    return Err(HindexError::ChallengeBlocked);
                }
                ChallengeState::Failed(reason) => {
                    self.reset_frame(session).await;
                    warn!(reason = %reason, "Captcha could not be solved");
                    return Err(HindexError::ChallengeFailed(reason));
                }
                _ => {}
            }

            let next = self.step(session, &state, &mut report.cycles).await?;
            debug!(from = %state, to = %next, "Captcha transition");
            state = next;
        }
    }

    /// Perform the work of one non-terminal state and pick the next one
    async fn step<S: Session + ?Sized>(
        &self,
        session: &mut S,
        state: &ChallengeState,
        cycles: &mut usize,
    ) -> Result<ChallengeState> {
        match state {
            ChallengeState::Detecting => {
                let source = session.page_source().await?;
                if !self.config.is_challenge(&source) {
                    return Ok(ChallengeState::Resolved);
                }
                *cycles += 1;
                if *cycles > self.config.max_cycles {
                    return Ok(ChallengeState::Failed(format!(
                        "challenge still present after {} attempts",
                        self.config.max_cycles
                    )));
                }
                Ok(ChallengeState::CheckboxAttempt)
            }
            ChallengeState::CheckboxAttempt => self.click_checkbox(session).await,
            ChallengeState::AudioChallengeAttempt => self.open_audio_challenge(session).await,
            ChallengeState::AudioDownload => self.find_download_link(session).await,
            ChallengeState::Transcribe { link } => self.transcribe(session, link).await,
            ChallengeState::Submit { answer } => self.submit(session, answer).await,
            terminal => Ok(terminal.clone()),
        }
    }

    async fn click_checkbox<S: Session + ?Sized>(&self, session: &mut S) -> Result<ChallengeState> {
        let Some(frame) = session.wait_for(&FRAME, self.config.frame_wait).await? else {
            return Ok(ChallengeState::Failed(
                "challenge iframe did not appear".to_string(),
            ));
        };
        session.enter_frame(&frame).await?;

        let Some(checkbox) = session.wait_for(&CHECKBOX, self.config.frame_wait).await? else {
            session.leave_frame().await?;
            return Ok(ChallengeState::Failed(
                "challenge checkbox did not appear".to_string(),
            ));
        };
        session.click(&checkbox).await?;
        session.leave_frame().await?;

        self.jitter.pause().await;
        Ok(ChallengeState::AudioChallengeAttempt)
    }

    async fn open_audio_challenge<S: Session + ?Sized>(
        &self,
        session: &mut S,
    ) -> Result<ChallengeState> {
        let frames = session.find_all(&FRAME).await?;
        let Some(frame) = frames.get(AUDIO_FRAME_INDEX) else {
            debug!(frames = frames.len(), "No additional captcha check");
            return Ok(ChallengeState::Detecting);
        };
        session.enter_frame(frame).await?;

        match session.wait_for(&AUDIO_BUTTON, self.config.audio_wait).await? {
            Some(button) => {
                session.click(&button).await?;
                Ok(ChallengeState::AudioDownload)
            }
            None => {
                session.leave_frame().await?;
                debug!("No audio challenge offered");
                Ok(ChallengeState::Detecting)
            }
        }
    }

    async fn find_download_link<S: Session + ?Sized>(
        &self,
        session: &mut S,
    ) -> Result<ChallengeState> {
        if let Some(link) = session.wait_for(&DOWNLOAD_LINK, self.config.audio_wait).await? {
            if let Some(href) = session.attribute(&link, "href").await? {
                return Ok(ChallengeState::Transcribe { link: href });
            }
        }

        let source = session.page_source().await?;
        if self.config.is_blocked(&source) {
            Ok(ChallengeState::Blocked)
        } else {
            Ok(ChallengeState::Failed(
                "audio challenge offered no download link".to_string(),
            ))
        }
    }

    async fn transcribe<S: Session + ?Sized>(
        &self,
        session: &mut S,
        link: &str,
    ) -> Result<ChallengeState> {
        let audio = self.fetcher.get_bytes(link).await?;
        debug!(bytes = audio.len(), "Downloaded challenge audio");

        match self.transcriber.transcribe(&audio).await? {
            Transcription::Text(answer) => Ok(ChallengeState::Submit { answer }),
            Transcription::Unrecognized => {
                warn!("Speech recognition failed, retrying");
                session.leave_frame().await?;
                Ok(ChallengeState::Detecting)
            }
        }
    }

    async fn submit<S: Session + ?Sized>(
        &self,
        session: &mut S,
        answer: &str,
    ) -> Result<ChallengeState> {
        match session.wait_for(&AUDIO_RESPONSE, self.config.audio_wait).await? {
            Some(field) => {
                session
                    .send_keys(&field, &format!("{}{}", answer, ENTER))
                    .await?;
            }
            None => warn!("Audio response field disappeared before submit"),
        }
        session.leave_frame().await?;

        self.jitter.pause().await;
        Ok(ChallengeState::Detecting)
    }

    async fn reset_frame<S: Session + ?Sized>(&self, session: &mut S) {
        if let Err(e) = session.leave_frame().await {
            debug!(error = %e, "Failed to leave challenge frame");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::fake::{FakeChallenge, FakeFetcher, FakeSession, FakeTranscriber, AUDIO_URL};

    fn solver(outcomes: Vec<Transcription>) -> (ChallengeSolver, Arc<FakeFetcher>) {
        let fetcher = Arc::new(FakeFetcher::new());
        let solver = ChallengeSolver::new(
            fetcher.clone(),
            Arc::new(FakeTranscriber::new(outcomes)),
            ChallengeConfig::default(),
        )
        .with_jitter(Jitter::none());
        (solver, fetcher)
    }

    fn challenged(challenge: FakeChallenge) -> FakeSession {
        let mut session = FakeSession::new();
        session.challenge = Some(challenge);
        session
    }

    #[tokio::test]
    async fn test_no_challenge_resolves_immediately() -> Result<()> {
        let (solver, _) = solver(vec![]);
        let mut session = FakeSession::new();

        let report = solver.solve(&mut session).await?;
        assert_eq!(
            report.path,
            vec![ChallengeState::Detecting, ChallengeState::Resolved]
        );
        assert_eq!(report.cycles, 0);
        assert!(session.log.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_single_checkbox_click_resolves_without_audio() -> Result<()> {
        let (solver, fetcher) = solver(vec![]);
        let mut session = challenged(FakeChallenge::checkbox(1));

        let report = solver.solve(&mut session).await?;
        assert_eq!(report.path.last(), Some(&ChallengeState::Resolved));
        assert_eq!(report.cycles, 1);
        assert!(session.did("click checkbox"));
        assert!(!session.did("enter iframe:2"));
        assert!(!session.did("click audio-button"));
        assert!(!report.visited(&ChallengeState::AudioDownload));
        assert!(fetcher.requested().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_audio_challenge_is_transcribed_and_submitted() -> Result<()> {
        let (solver, fetcher) = solver(vec![Transcription::Text("seven blue".to_string())]);
        let mut session = challenged(FakeChallenge::audio("seven blue"));

        let report = solver.solve(&mut session).await?;
        assert_eq!(report.path.last(), Some(&ChallengeState::Resolved));
        assert!(report.visited(&ChallengeState::Submit {
            answer: String::new()
        }));
        assert!(session.did("click audio-button"));
        assert!(session.did("type audio-response seven blue"));
        assert_eq!(fetcher.requested(), vec![AUDIO_URL.to_string()]);
        Ok(())
    }

    #[tokio::test]
    async fn test_unrecognized_audio_retries_whole_challenge() -> Result<()> {
        let (solver, _) = solver(vec![
            Transcription::Unrecognized,
            Transcription::Text("four".to_string()),
        ]);
        let mut session = challenged(FakeChallenge::audio("four"));

        let report = solver.solve(&mut session).await?;
        assert_eq!(report.cycles, 2);
        let typed: Vec<_> = session.log.iter().filter(|l| l.starts_with("type ")).collect();
        assert_eq!(typed, vec!["type audio-response four"]);
        Ok(())
    }

    #[tokio::test]
    async fn test_wrong_answer_is_rechecked() -> Result<()> {
        let (solver, _) = solver(vec![
            Transcription::Text("wrong".to_string()),
            Transcription::Text("right".to_string()),
        ]);
        let mut session = challenged(FakeChallenge::audio("right"));

        let report = solver.solve(&mut session).await?;
        assert_eq!(report.cycles, 2);
        assert!(session.did("type audio-response wrong"));
        assert!(session.did("type audio-response right"));
        Ok(())
    }

    #[tokio::test]
    async fn test_block_marker_is_fatal() {
        let (solver, _) = solver(vec![]);
        let mut session = challenged(FakeChallenge::blocked());

        let err = solver.solve(&mut session).await.expect_err("should be blocked");
        assert!(matches!(err, HindexError::ChallengeBlocked));
    }

    #[tokio::test]
    async fn test_missing_download_link_without_block_marker_fails() {
        let (solver, _) = solver(vec![]);
        let mut session = challenged(FakeChallenge {
            audio_frame: true,
            ..Default::default()
        });

        let err = solver.solve(&mut session).await.expect_err("should fail");
        assert!(matches!(err, HindexError::ChallengeFailed(_)));
    }

    #[tokio::test]
    async fn test_exhausted_cycles_fail() {
        let fetcher = Arc::new(FakeFetcher::new());
        let config = ChallengeConfig {
            max_cycles: 3,
            ..Default::default()
        };
        let solver = ChallengeSolver::new(fetcher, Arc::new(FakeTranscriber::new(vec![])), config)
            .with_jitter(Jitter::none());
        let mut session = challenged(FakeChallenge::audio("never heard"));

        let err = solver.solve(&mut session).await.expect_err("should give up");
        assert!(matches!(err, HindexError::ChallengeFailed(ref m) if m.contains("3 attempts")));
        assert_eq!(
            session.log.iter().filter(|l| *l == "click checkbox").count(),
            3
        );
    }

    #[test]
    fn test_marker_detection() {
        let config = ChallengeConfig::default();
        assert!(config.is_challenge("<p>Please show you're not a robot</p>"));
        assert!(!config.is_challenge("<p>Cited by 4</p>"));
        assert!(config.is_blocked("sending automated queries"));
    }
}
