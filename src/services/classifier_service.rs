use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use serde_json::json;

use crate::error::AppError;
use crate::models::plan::Confidence;

pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.0-flash";
pub const DEFAULT_GEMINI_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";
const MAX_PROMPT_SNIPPET_CHARS: usize = 500;
const DRAFTS_LABEL: &str = "Drafts";
const LAST_RESORT_LABEL: &str = "To Sort";

const KEYWORD_RULES: &[(&str, &str)] = &[
    (r"sos[-_ ]?231", "Social Sciences"),
    (r"ort[-_ ]?11[12]", "Oral Communication"),
    (r"comp[-_ ]?ii", "Computer Science"),
    (r"c\+\+", "Computer Science"),
    (r"python", "Computer Science"),
    (r"mansa.?musa", "African History"),
    (r"mali(an)?.*empire", "African History"),
    (r"african.*diaspora", "African History"),
    (r"egypt(ian)?", "African History"),
    (r"pharaoh", "African History"),
    (r"mesopotamia", "World History"),
    (r"fertile.?crescent", "World History"),
    (r"physics", "Physics Files"),
    (r"newton", "Physics Files"),
    (r"quantum", "Physics Files"),
    (r"thermodynamics", "Physics Files"),
    (r"biology", "Biology Coursework"),
    (r"muscular", "Biology Coursework"),
    (r"digestive", "Biology Coursework"),
    (r"immune.*system", "Biology Coursework"),
    (r"organs", "Biology Coursework"),
    (r"calculus", "Mathematics"),
    (r"algorithm", "Computer Science"),
    (r"dijkstra", "Computer Science"),
    (r"kruskal", "Computer Science"),
    (r"resume", "Resume"),
    (r"cv\b", "Resume"),
    (r"curriculum.?vitae", "Resume"),
    (r"cover[_\s]?letter", "Job Applications"),
    (r"application", "Job Applications"),
    (r"internship", "Job Applications"),
    (r"job.*description", "Job Applications"),
    (r"interview", "Interview Prep"),
    (r"hackathon|treehacks|nexhacks", "Hackathon Projects"),
    (r"microsoft|google|uber|meta\b|amazon", "Job Applications"),
    (r"d\.?e\.?\s*shaw", "Job Applications"),
    (r"codepath|code2040|new.?technologists", "Tech Programs"),
    (r"\bisa\b", "ISA Documents"),
    (r"international.*student", "ISA Documents"),
    (r"\bgdsc\b", "GDSC Documents"),
    (r"study.?notes|notes|lecture", "Course Notes"),
    (r"assignment|homework|\bquiz\b|\bexam\b", "Course Notes"),
    (r"\bessay\b", "Essays"),
    (r"research.*paper", "Research Papers"),
    (r"speech", "Speech Class"),
    (r"presentation", "Presentations"),
    (r"receipt|invoice|budget|tax|bank|statement", "Financial Records"),
    (r"transcript", "Personal Documents"),
    (r"certificate|certification|diploma", "Certificates"),
    (r"recommendation|reference", "Recommendations"),
    (r"photo|\bimg\b|image|\.jpe?g$|\.png$", "Photos"),
    (r"screenshot", "Screenshots"),
    (r"screen.?recording", "Screen Recordings"),
    (r"\.mp4$|\.mov$|vid[-_]", "Videos"),
    (r"project|github|firebase", "Projects"),
];

#[derive(Debug, Clone, Default)]
pub struct ClassifyRequest {
    pub name: String,
    pub content: Option<String>,
    /// Names of folders that already exist in storage, offered as candidates.
    pub known_folders: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub label: String,
    pub confidence: Option<Confidence>,
    pub reasoning: Option<String>,
}

impl Classification {
    pub fn label(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            confidence: None,
            reasoning: None,
        }
    }
}

/// Oracle suggesting a folder label for one file. Untrusted: may fail, stall,
/// or return labels in any casing.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, request: &ClassifyRequest) -> Result<Classification, AppError>;
}

// ---------------------------------------------------------------------------
// Keyword rules
// ---------------------------------------------------------------------------

/// Offline classifier matching ordered regex rules against the file name,
/// then against the content snippet.
pub struct KeywordClassifier {
    rules: Vec<(Regex, String)>,
}

fn compile_rule(pattern: &str) -> Result<Regex, AppError> {
    Regex::new(&format!("(?i){pattern}"))
        .map_err(|e| AppError::Config(format!("invalid keyword rule '{pattern}': {e}")))
}

impl KeywordClassifier {
    pub fn new() -> Result<Self, AppError> {
        let rules = KEYWORD_RULES
            .iter()
            .map(|(pattern, folder)| Ok((compile_rule(pattern)?, folder.to_string())))
            .collect::<Result<Vec<_>, AppError>>()?;
        Ok(Self { rules })
    }

    /// Adds a rule; `priority` is the position in the rule list, `None` appends.
    pub fn add_rule(
        &mut self,
        pattern: &str,
        folder: &str,
        priority: Option<usize>,
    ) -> Result<(), AppError> {
        let rule = (compile_rule(pattern)?, folder.to_string());
        match priority {
            Some(idx) => self.rules.insert(idx.min(self.rules.len()), rule),
            None => self.rules.push(rule),
        }
        Ok(())
    }

    pub fn rules_for_folder(&self, folder: &str) -> Vec<String> {
        self.rules
            .iter()
            .filter(|(_, f)| f.eq_ignore_ascii_case(folder))
            .map(|(re, _)| re.as_str().trim_start_matches("(?i)").to_string())
            .collect()
    }

    fn first_match(&self, text: &str) -> Option<(&Regex, &str)> {
        self.rules
            .iter()
            .find(|(re, _)| re.is_match(text))
            .map(|(re, folder)| (re, folder.as_str()))
    }

    pub fn classify_sync(&self, request: &ClassifyRequest) -> Classification {
        let matched = self
            .first_match(&request.name)
            .map(|m| (m, "filename"))
            .or_else(|| {
                request
                    .content
                    .as_deref()
                    .and_then(|content| self.first_match(content))
                    .map(|m| (m, "content"))
            });

        if let Some(((re, folder), source)) = matched {
            return Classification {
                label: folder.to_string(),
                confidence: Some(Confidence::High),
                reasoning: Some(format!(
                    "Matched pattern '{}' in {source}",
                    re.as_str().trim_start_matches("(?i)")
                )),
            };
        }

        if request.name.to_lowercase().contains("untitled") {
            return Classification {
                label: DRAFTS_LABEL.to_string(),
                confidence: Some(Confidence::Low),
                reasoning: Some("Untitled document, likely a draft".to_string()),
            };
        }

        Classification {
            label: LAST_RESORT_LABEL.to_string(),
            confidence: Some(Confidence::Low),
            reasoning: Some("No clear category detected; needs manual review".to_string()),
        }
    }
}

#[async_trait]
impl Classifier for KeywordClassifier {
    async fn classify(&self, request: &ClassifyRequest) -> Result<Classification, AppError> {
        Ok(self.classify_sync(request))
    }
}

// ---------------------------------------------------------------------------
// Gemini
// ---------------------------------------------------------------------------

pub fn build_classification_prompt(request: &ClassifyRequest) -> String {
    let folder_list = if request.known_folders.is_empty() {
        "  (No existing folders)".to_string()
    } else {
        request
            .known_folders
            .iter()
            .map(|folder| format!("  - {folder}"))
            .collect::<Vec<_>>()
            .join("\n")
    };

    let mut prompt = format!(
        "You are a file organization assistant. Decide which folder a file belongs in.\n\n\
         EXISTING FOLDERS:\n{folder_list}\n\n\
         Place the file in an EXISTING folder when it fits well, otherwise suggest a NEW folder.\n\
         Never use generic names such as \"Miscellaneous\", \"Other\", \"Uncategorized\", \"Random\" or \"Stuff\".\n\
         Folder names are 2-4 words in Title Case and group by purpose or subject, not file type.\n\
         Look for course codes, subjects, organizations and document types in the name.\n\n\
         Respond with ONLY a JSON object:\n\
         {{\"suggested_folder\": \"Folder Name\", \"is_new_folder\": true, \"confidence\": \"high|medium|low\", \"reasoning\": \"short explanation\"}}\n\n\
         FILE TO CLASSIFY: {}",
        request.name
    );

    if let Some(content) = request.content.as_deref().filter(|c| !c.trim().is_empty()) {
        let preview: String = content.chars().take(MAX_PROMPT_SNIPPET_CHARS).collect();
        prompt.push_str(&format!("\n\nFILE CONTENT PREVIEW:\n{preview}"));
    }
    prompt
}

pub fn extract_json_payload(text: &str) -> Option<String> {
    let trimmed = text.trim();

    if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + "```json".len()..];
        if let Some(end) = rest.find("```") {
            return Some(rest[..end].trim().to_string());
        }
    }

    if let Some(start) = trimmed.find("```") {
        let rest = &trimmed[start + 3..];
        if let Some(newline) = rest.find('\n') {
            let body = &rest[newline + 1..];
            if let Some(end) = body.find("```") {
                return Some(body[..end].trim().to_string());
            }
        }
    }

    let first = trimmed.find('{')?;
    let last = trimmed.rfind('}')?;
    if first <= last {
        return Some(trimmed[first..=last].to_string());
    }

    None
}

#[derive(Debug, Deserialize)]
struct ClassificationPayload {
    suggested_folder: String,
    #[serde(default)]
    confidence: Option<String>,
    #[serde(default)]
    reasoning: Option<String>,
}

pub fn parse_classification_response(text: &str) -> Result<Classification, AppError> {
    let payload = extract_json_payload(text).ok_or_else(|| {
        let head: String = text.chars().take(100).collect();
        AppError::Classification(format!("no JSON object in response: {head}"))
    })?;
    let parsed: ClassificationPayload = serde_json::from_str(&payload)?;
    if parsed.suggested_folder.trim().is_empty() {
        return Err(AppError::Classification(
            "response suggested an empty folder".to_string(),
        ));
    }
    Ok(Classification {
        label: parsed.suggested_folder,
        confidence: parsed.confidence.and_then(|c| c.parse().ok()),
        reasoning: parsed.reasoning.filter(|r| !r.trim().is_empty()),
    })
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

/// Classifier backed by the Gemini `generateContent` API.
pub struct GeminiClassifier {
    client: reqwest::Client,
    api_key: String,
    model: String,
    endpoint: String,
}

impl GeminiClassifier {
    pub fn new(
        api_key: String,
        model: String,
        endpoint: String,
        request_timeout: Duration,
    ) -> Result<Self, AppError> {
        if api_key.trim().is_empty() {
            return Err(AppError::Config("Gemini API key is empty".to_string()));
        }
        let client = reqwest::Client::builder().timeout(request_timeout).build()?;
        Ok(Self {
            client,
            api_key,
            model,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl Classifier for GeminiClassifier {
    async fn classify(&self, request: &ClassifyRequest) -> Result<Classification, AppError> {
        let url = format!("{}/models/{}:generateContent", self.endpoint, self.model);
        let body = json!({
            "contents": [{"parts": [{"text": build_classification_prompt(request)}]}],
            "generationConfig": {"temperature": 0.0},
        });

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let head: String = text.chars().take(200).collect();
            return Err(AppError::Classification(format!(
                "Gemini returned {status}: {head}"
            )));
        }

        let parsed: GenerateResponse = response.json().await?;
        let text = parsed
            .candidates
            .into_iter()
            .flat_map(|c| c.content.parts)
            .filter_map(|p| p.text)
            .collect::<Vec<_>>()
            .join("");
        tracing::debug!(file = %request.name, chars = text.len(), "gemini response");
        parse_classification_response(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(name: &str) -> ClassifyRequest {
        ClassifyRequest {
            name: name.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn keyword_rules_match_case_insensitively_in_order() {
        let classifier = KeywordClassifier::new().unwrap();

        let newton = classifier.classify_sync(&request("Newton_Laws_Notes.pdf"));
        assert_eq!(newton.label, "Physics Files");
        assert_eq!(newton.confidence, Some(Confidence::High));

        assert_eq!(
            classifier.classify_sync(&request("MANSA MUSA AND ISLAM IN AFRICA.docx")).label,
            "African History"
        );
        assert_eq!(
            classifier.classify_sync(&request("Q3_Budget_Analysis.xlsx")).label,
            "Financial Records"
        );
        assert_eq!(
            classifier.classify_sync(&request("IMG_20240615_vacation_beach.jpg")).label,
            "Photos"
        );
    }

    #[test]
    fn keyword_falls_back_to_drafts_then_to_sort() {
        let classifier = KeywordClassifier::new().unwrap();

        let draft = classifier.classify_sync(&request("Untitled document"));
        assert_eq!(draft.label, "Drafts");
        assert_eq!(draft.confidence, Some(Confidence::Low));

        assert_eq!(classifier.classify_sync(&request("zzz.bin")).label, "To Sort");
    }

    #[test]
    fn keyword_uses_content_when_name_is_opaque() {
        let classifier = KeywordClassifier::new().unwrap();
        let req = ClassifyRequest {
            name: "scan_0042.pdf".to_string(),
            content: Some("INVOICE #1234 total due".to_string()),
            known_folders: Vec::new(),
        };

        let result = classifier.classify_sync(&req);
        assert_eq!(result.label, "Financial Records");
        assert!(result.reasoning.unwrap().ends_with("in content"));
    }

    #[test]
    fn added_rules_respect_priority() {
        let mut classifier = KeywordClassifier::new().unwrap();
        classifier.add_rule("budget", "Budgets", Some(0)).unwrap();
        classifier.add_rule("zzz", "Sleep", None).unwrap();

        assert_eq!(classifier.classify_sync(&request("budget.xlsx")).label, "Budgets");
        assert_eq!(classifier.classify_sync(&request("zzz.bin")).label, "Sleep");
        assert_eq!(classifier.rules_for_folder("sleep"), vec!["zzz".to_string()]);
        assert!(classifier.add_rule("(", "Broken", None).is_err());
    }

    #[test]
    fn parse_response_handles_code_fences_and_prose() {
        let fenced = "```json\n{\"suggested_folder\": \"Invoices\", \"is_new_folder\": true, \"confidence\": \"HIGH\", \"reasoning\": \"bill\"}\n```";
        let parsed = parse_classification_response(fenced).unwrap();
        assert_eq!(parsed.label, "Invoices");
        assert_eq!(parsed.confidence, Some(Confidence::High));
        assert_eq!(parsed.reasoning.as_deref(), Some("bill"));

        let prose = "Sure! {\"suggested_folder\": \"Notes\", \"confidence\": \"maybe\"} hope that helps";
        let parsed = parse_classification_response(prose).unwrap();
        assert_eq!(parsed.label, "Notes");
        assert_eq!(parsed.confidence, None);
    }

    #[test]
    fn parse_response_rejects_missing_or_empty_folder() {
        assert!(parse_classification_response("no json here").is_err());
        assert!(parse_classification_response("{\"suggested_folder\": \"  \"}").is_err());
        assert!(parse_classification_response("{\"folder\": \"x\"}").is_err());
    }

    #[test]
    fn prompt_lists_folders_and_truncates_content() {
        let req = ClassifyRequest {
            name: "report.txt".to_string(),
            content: Some("a".repeat(900)),
            known_folders: vec!["Resume".to_string(), "Projects".to_string()],
        };
        let prompt = build_classification_prompt(&req);
        assert!(prompt.contains("  - Resume\n  - Projects"));
        assert!(prompt.contains("FILE TO CLASSIFY: report.txt"));
        assert!(prompt.contains(&"a".repeat(500)));
        assert!(!prompt.contains(&"a".repeat(501)));

        let bare = build_classification_prompt(&request("x"));
        assert!(bare.contains("(No existing folders)"));
        assert!(!bare.contains("FILE CONTENT PREVIEW"));
    }

    #[test]
    fn gemini_requires_api_key() {
        let result = GeminiClassifier::new(
            " ".to_string(),
            DEFAULT_GEMINI_MODEL.to_string(),
            DEFAULT_GEMINI_ENDPOINT.to_string(),
            Duration::from_secs(5),
        );
        assert!(result.is_err());
    }
}
