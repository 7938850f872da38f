pub mod client;
pub mod dto;
pub mod image_prep;
pub mod retry;

pub use client::{ChatTransport, HttpTransport, OpenAiVisionClient, VisionClient};
pub use dto::{AnalyzedFoodItem, FoodAnalysisResult, MealType};
