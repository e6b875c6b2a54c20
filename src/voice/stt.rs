//! Speech-to-text (STT) processing

use super::clip::AudioClip;
use crate::config::{Config, SttProvider};
use crate::{Error, Result};

/// Converts a recorded clip to text
///
/// Takes the clip by value; it is dropped when transcription returns, on
/// success or failure.
pub trait Transcriber {
    /// # Errors
    ///
    /// Returns error on I/O or service failure; silence is an empty string
    fn transcribe(&self, clip: AudioClip) -> Result<String>;
}

/// Response from OpenAI Whisper transcription API
#[derive(serde::Deserialize)]
struct WhisperResponse {
    text: String,
}

/// Response from Deepgram transcription API
#[derive(serde::Deserialize)]
struct DeepgramResponse {
    results: DeepgramResults,
}

#[derive(serde::Deserialize)]
struct DeepgramResults {
    channels: Vec<DeepgramChannel>,
}

#[derive(serde::Deserialize)]
struct DeepgramChannel {
    alternatives: Vec<DeepgramAlternative>,
}

#[derive(serde::Deserialize)]
struct DeepgramAlternative {
    transcript: String,
}

/// Transcribes through a hosted STT API
pub struct RemoteTranscriber {
    client: reqwest::blocking::Client,
    api_key: String,
    model: String,
    provider: SttProvider,
    base_url: String,
}

impl RemoteTranscriber {
    /// Create a transcriber using `OpenAI` Whisper
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new_whisper(api_key: String, model: String, base_url: String) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config(
                "OpenAI API key required for Whisper".to_string(),
            ));
        }

        Ok(Self {
            client: reqwest::blocking::Client::new(),
            api_key,
            model,
            provider: SttProvider::Whisper,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Create a transcriber using Deepgram
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new_deepgram(api_key: String, model: String) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config("Deepgram API key required".to_string()));
        }

        Ok(Self {
            client: reqwest::blocking::Client::new(),
            api_key,
            model,
            provider: SttProvider::Deepgram,
            base_url: "https://api.deepgram.com/v1".to_string(),
        })
    }

    /// Build the configured provider
    ///
    /// # Errors
    ///
    /// Returns error if the provider's key is not configured
    pub fn from_config(config: &Config) -> Result<Self> {
        let speech = &config.speech;
        match speech.stt_provider {
            SttProvider::Whisper => Self::new_whisper(
                config.api_keys.openai.clone().unwrap_or_default(),
                speech.stt_model.clone(),
                config.llm.base_url.clone(),
            ),
            SttProvider::Deepgram => Self::new_deepgram(
                config.api_keys.deepgram.clone().unwrap_or_default(),
                // whisper-1 means nothing to Deepgram
                if speech.stt_model.starts_with("whisper") {
                    "nova-2".to_string()
                } else {
                    speech.stt_model.clone()
                },
            ),
        }
    }

    /// Transcribe using OpenAI Whisper
    fn transcribe_whisper(&self, audio: Vec<u8>) -> Result<String> {
        tracing::debug!(audio_bytes = audio.len(), "starting Whisper transcription");

        let form = reqwest::blocking::multipart::Form::new()
            .part(
                "file",
                reqwest::blocking::multipart::Part::bytes(audio)
                    .file_name("audio.wav")
                    .mime_str("audio/wav")
                    .map_err(|e| Error::Stt(e.to_string()))?,
            )
            .text("model", self.model.clone());

        let response = self
            .client
            .post(format!("{}/audio/transcriptions", self.base_url))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .inspect_err(|e| tracing::error!(error = %e, "Whisper request failed"))?;

        let status = response.status();
        tracing::debug!(status = %status, "received response");

        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Whisper API error");
            return Err(Error::Stt(format!("Whisper API error {status}: {body}")));
        }

        let result: WhisperResponse = response
            .json()
            .inspect_err(|e| tracing::error!(error = %e, "failed to parse response"))?;

        tracing::info!(transcript = %result.text, "transcription complete");
        Ok(result.text)
    }

    /// Transcribe using Deepgram
    fn transcribe_deepgram(&self, audio: Vec<u8>) -> Result<String> {
        tracing::debug!(audio_bytes = audio.len(), "starting Deepgram transcription");

        let url = format!(
            "{}/listen?model={}&punctuate=true",
            self.base_url, self.model
        );

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Token {}", self.api_key))
            .header("Content-Type", "audio/wav")
            .body(audio)
            .send()
            .inspect_err(|e| tracing::error!(error = %e, "Deepgram request failed"))?;

        let status = response.status();
        tracing::debug!(status = %status, "received response");

        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Deepgram API error");
            return Err(Error::Stt(format!("Deepgram API error {status}: {body}")));
        }

        let result: DeepgramResponse = response
            .json()
            .inspect_err(|e| tracing::error!(error = %e, "failed to parse Deepgram response"))?;

        let transcript = first_transcript(result);
        tracing::info!(transcript = %transcript, "transcription complete");
        Ok(transcript)
    }
}

fn first_transcript(response: DeepgramResponse) -> String {
    response
        .results
        .channels
        .into_iter()
        .next()
        .and_then(|c| c.alternatives.into_iter().next())
        .map(|a| a.transcript)
        .unwrap_or_default()
}

impl Transcriber for RemoteTranscriber {
    fn transcribe(&self, clip: AudioClip) -> Result<String> {
        if clip.is_empty() {
            return Ok(String::new());
        }

        let audio = clip.to_wav()?;
        drop(clip);

        match self.provider {
            SttProvider::Whisper => self.transcribe_whisper(audio),
            SttProvider::Deepgram => self.transcribe_deepgram(audio),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deepgram_response_takes_first_alternative() {
        let response: DeepgramResponse = serde_json::from_str(
            r#"{"results":{"channels":[{"alternatives":[
                {"transcript":"how long do I boil it"},
                {"transcript":"how long do I broil it"}
            ]}]}}"#,
        )
        .unwrap();
        assert_eq!(first_transcript(response), "how long do I boil it");
    }

    #[test]
    fn deepgram_response_without_channels_is_empty() {
        let response: DeepgramResponse =
            serde_json::from_str(r#"{"results":{"channels":[]}}"#).unwrap();
        assert_eq!(first_transcript(response), "");
    }

    #[test]
    fn missing_keys_rejected() {
        assert!(RemoteTranscriber::new_whisper(String::new(), "whisper-1".into(), "x".into()).is_err());
        assert!(RemoteTranscriber::new_deepgram(String::new(), "nova-2".into()).is_err());
    }

    #[test]
    fn empty_clip_skips_the_network() {
        let stt =
            RemoteTranscriber::new_whisper("sk-test".into(), "whisper-1".into(), "http://127.0.0.1:9".into())
                .unwrap();
        assert_eq!(stt.transcribe(AudioClip::new(Vec::new(), 16_000)).unwrap(), "");
    }
}
