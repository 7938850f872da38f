use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::VisionError;

// ---- outbound chat-completion body ----

#[derive(Debug, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
}

#[derive(Debug, Serialize)]
pub struct ChatMessage {
    pub role: &'static str,
    pub content: Vec<ContentPart>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
pub struct ImageUrl {
    pub url: String,
    pub detail: &'static str,
}

// ---- inbound envelope ----

#[derive(Debug, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
pub struct ChatChoice {
    pub message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
pub struct ChoiceMessage {
    #[serde(default)]
    pub content: Option<String>,
}

// ---- parsed nutrition result ----

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MealType {
    Breakfast,
    Lunch,
    Dinner,
    Snack,
}

impl MealType {
    /// The model's suggestion is advisory only; anything unrecognized
    /// falls back to snack instead of failing the whole analysis.
    pub fn from_model(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "breakfast" => Self::Breakfast,
            "lunch" => Self::Lunch,
            "dinner" => Self::Dinner,
            "snack" => Self::Snack,
            other => {
                debug!(value = other, "unrecognized meal type, defaulting to snack");
                Self::Snack
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalyzedFoodItem {
    pub name: String,
    pub serving_size: String,
    pub calories: u32,
    pub protein_g: f64,
    pub carbs_g: f64,
    pub fat_g: f64,
    pub fiber_g: Option<f64>,
    pub sugar_g: Option<f64>,
    pub sodium_mg: Option<f64>,
    pub saturated_fat_g: Option<f64>,
    pub cholesterol_mg: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FoodAnalysisResult {
    /// May be empty: zero detected foods is a valid answer, the caller
    /// decides whether to reject it.
    pub items: Vec<AnalyzedFoodItem>,
    /// 0.0..=1.0, mapped from the model's 0-100 integer.
    pub confidence: f64,
    pub suggested_meal_type: MealType,
    pub notes: Option<String>,
    /// Unparsed model text, kept for audit.
    pub raw_response: String,
}

// What the prompt asks the model to emit.

#[derive(Debug, Deserialize)]
struct NutritionPayload {
    #[serde(default)]
    items: Vec<PayloadItem>,
    confidence: i64,
    #[serde(default)]
    suggested_meal_type: Option<String>,
    #[serde(default)]
    notes: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PayloadItem {
    name: String,
    #[serde(default)]
    serving_size: Option<String>,
    calories: i64,
    protein: f64,
    carbs: f64,
    fat: f64,
    #[serde(default)]
    fiber: Option<f64>,
    #[serde(default)]
    sugar: Option<f64>,
    #[serde(default)]
    sodium: Option<f64>,
    #[serde(default)]
    saturated_fat: Option<f64>,
    #[serde(default)]
    cholesterol: Option<f64>,
}

/// Parse the model's (possibly code-fenced) JSON answer into a typed
/// result. Content errors are terminal for the attempt, never retried.
pub fn parse_analysis(raw: &str) -> Result<FoodAnalysisResult, VisionError> {
    let cleaned = strip_fences(raw);
    let payload: NutritionPayload =
        serde_json::from_str(cleaned).map_err(|e| VisionError::ParsingFailed(e.to_string()))?;

    let mut items = Vec::with_capacity(payload.items.len());
    for item in payload.items {
        items.push(convert_item(item)?);
    }

    let confidence = (payload.confidence as f64 / 100.0).clamp(0.0, 1.0);
    let suggested_meal_type = match payload.suggested_meal_type.as_deref() {
        Some(s) => MealType::from_model(s),
        None => {
            debug!("meal type missing from model answer, defaulting to snack");
            MealType::Snack
        }
    };

    Ok(FoodAnalysisResult {
        items,
        confidence,
        suggested_meal_type,
        notes: payload.notes.filter(|n| !n.trim().is_empty()),
        raw_response: raw.to_string(),
    })
}

fn convert_item(item: PayloadItem) -> Result<AnalyzedFoodItem, VisionError> {
    if item.calories < 0 {
        return Err(VisionError::ParsingFailed(format!(
            "negative calories for {:?}",
            item.name
        )));
    }
    for (field, value) in [
        ("protein", item.protein),
        ("carbs", item.carbs),
        ("fat", item.fat),
    ] {
        if value < 0.0 || !value.is_finite() {
            return Err(VisionError::ParsingFailed(format!(
                "invalid {field} for {:?}",
                item.name
            )));
        }
    }

    let serving_size = match item.serving_size {
        Some(s) if !s.trim().is_empty() => s,
        _ => {
            debug!(item = %item.name, "serving size missing, defaulting to 100 g");
            "100 g".to_string()
        }
    };

    Ok(AnalyzedFoodItem {
        name: item.name,
        serving_size,
        calories: item.calories as u32,
        protein_g: item.protein,
        carbs_g: item.carbs,
        fat_g: item.fat,
        fiber_g: item.fiber,
        sugar_g: item.sugar,
        sodium_mg: item.sodium,
        saturated_fat_g: item.saturated_fat,
        cholesterol_mg: item.cholesterol,
    })
}

/// Models often wrap JSON answers in Markdown fences despite being told
/// not to; accept both forms.
fn strip_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let trimmed = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    trimmed.strip_suffix("```").unwrap_or(trimmed).trim()
}
