use paperclip::actix::Apiv2Schema;
use serde::{Deserialize, Serialize};

/// Header carrying the authenticated identity, set by the session layer in
/// front of this service. Session issuance and validation are not handled
/// here.
pub const USER_ID_HEADER: &str = "x-user-id";

pub type UserId = i32;
pub type BookId = i32;
pub type RequestId = i32;
pub type CommentId = i32;
pub type ReviewId = i32;

/// Rejections produced when loosely-typed wire input is parsed into the
/// validated boundary types below. Handlers answer these with 400.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ValidationError {
    #[error("Price must be a finite non-negative number, got {0}")]
    InvalidPrice(f64),

    #[error("Quantity must be a positive integer, got {0}")]
    InvalidQuantity(i32),

    #[error("Rating must be between 1 and 5, got {0}")]
    InvalidRating(i16),

    #[error("Content must not be empty")]
    EmptyContent,
}

/// Non-negative, finite currency amount.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Price(f64);

impl Price {
    pub fn new(amount: f64) -> Result<Self, ValidationError> {
        if amount.is_finite() && amount >= 0.0 {
            Ok(Self(amount))
        } else {
            Err(ValidationError::InvalidPrice(amount))
        }
    }

    pub fn amount(self) -> f64 {
        self.0
    }
}

/// Positive purchase quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quantity(i32);

impl Quantity {
    pub fn new(quantity: i32) -> Result<Self, ValidationError> {
        if quantity > 0 {
            Ok(Self(quantity))
        } else {
            Err(ValidationError::InvalidQuantity(quantity))
        }
    }

    pub fn get(self) -> i32 {
        self.0
    }
}

/// Review rating in 1..=5.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rating(i16);

impl Rating {
    pub fn new(rating: i16) -> Result<Self, ValidationError> {
        if (1..=5).contains(&rating) {
            Ok(Self(rating))
        } else {
            Err(ValidationError::InvalidRating(rating))
        }
    }

    pub fn get(self) -> i16 {
        self.0
    }
}

/// Trimmed, non-empty comment body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommentText(String);

impl CommentText {
    pub fn new(content: &str) -> Result<Self, ValidationError> {
        let trimmed = content.trim();
        if trimmed.is_empty() {
            Err(ValidationError::EmptyContent)
        } else {
            Ok(Self(trimmed.to_string()))
        }
    }

    pub fn into_string(self) -> String {
        self.0
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Apiv2Schema)]
pub struct RegistrationDetails {
    pub username: String,
    pub password: String,
    pub email: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Apiv2Schema)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Apiv2Schema)]
pub struct AuthenticatedId {
    pub user_id: UserId,
}

/// Raw listing form as submitted by a client; the price is validated into
/// [`Price`] before the catalog is touched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Apiv2Schema)]
pub struct ListingForm {
    pub name: String,
    pub description: String,
    pub price: f64,
    pub semester: String,
    pub image_url: String,
}

/// Validated listing input handed to the repository.
#[derive(Debug, Clone)]
pub struct NewListing {
    pub name: String,
    pub description: String,
    pub price: Price,
    pub semester: String,
    pub image_url: String,
}

impl TryFrom<ListingForm> for NewListing {
    type Error = ValidationError;

    fn try_from(form: ListingForm) -> Result<Self, Self::Error> {
        Ok(Self {
            price: Price::new(form.price)?,
            name: form.name,
            description: form.description,
            semester: form.semester,
            image_url: form.image_url,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Apiv2Schema)]
pub struct Listing {
    pub book_id: BookId,
    pub seller_id: UserId,
    pub name: String,
    pub description: String,
    pub price: f64,
    pub semester: String,
    pub image_url: String,
}

/// A listing joined with its seller and review aggregates; `avg_rating` is
/// 0.0 when `review_count` is 0 (display convention, not a statistic).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Apiv2Schema)]
pub struct ListingSummary {
    pub book_id: BookId,
    pub seller_id: UserId,
    pub seller_username: String,
    pub name: String,
    pub description: String,
    pub price: f64,
    pub semester: String,
    pub image_url: String,
    pub avg_rating: f64,
    pub review_count: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Apiv2Schema)]
pub enum RequestStatus {
    Requested,
    Completed,
}

impl RequestStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RequestStatus::Requested => "Requested",
            RequestStatus::Completed => "Completed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Apiv2Schema)]
pub struct RequestForm {
    pub book_id: BookId,
    pub quantity: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Apiv2Schema)]
pub struct RequestRecord {
    pub request_id: RequestId,
    pub buyer_id: UserId,
    pub book_id: BookId,
    pub quantity: i32,
    pub total: f64,
    pub status: RequestStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Apiv2Schema)]
pub struct BuyerRequestView {
    pub request_id: RequestId,
    pub book_id: BookId,
    pub book_name: String,
    pub quantity: i32,
    pub total: f64,
    pub status: RequestStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Apiv2Schema)]
pub struct SellerRequestView {
    pub request_id: RequestId,
    pub book_id: BookId,
    pub book_name: String,
    pub buyer_id: UserId,
    pub buyer_username: String,
    pub quantity: i32,
    pub total: f64,
    pub status: RequestStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Apiv2Schema)]
pub struct CommentForm {
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Apiv2Schema)]
pub struct CommentView {
    pub comment_id: CommentId,
    pub book_id: BookId,
    pub author_id: UserId,
    pub author_username: String,
    pub content: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Apiv2Schema)]
pub struct ReviewForm {
    pub rating: i16,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Apiv2Schema)]
pub struct ReviewView {
    pub review_id: ReviewId,
    pub book_id: BookId,
    pub author_id: UserId,
    pub author_username: String,
    pub rating: i16,
    pub content: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Apiv2Schema)]
pub struct ListingsResponse {
    pub listings: Vec<ListingSummary>,
}

/// Everything the book detail page needs in one response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Apiv2Schema)]
pub struct ListingPage {
    pub listing: ListingSummary,
    pub comments: Vec<CommentView>,
    pub reviews: Vec<ReviewView>,
    pub viewer_review: Option<ReviewView>,
}
