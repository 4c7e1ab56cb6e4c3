pub use in_memory_exchange_repository::InMemoryExchangeRepository;
pub use postgres_exchange_repository::{
    PostgresExchangeRepository, PostgresExchangeRepositoryConfig,
};

use crate::api::{
    BookId, BuyerRequestView, CommentId, CommentText, CommentView, Listing, ListingSummary,
    NewListing, Quantity, Rating, RegistrationDetails, RequestId, RequestRecord, ReviewId,
    ReviewView, SellerRequestView, UserId,
};

mod in_memory_exchange_repository;
mod postgres_exchange_repository;

#[derive(Debug, thiserror::Error)]
pub enum ExchangeRepositoryError {
    #[error("Username {0} is already taken")]
    UsernameTaken(String),

    #[error("Invalid username or password")]
    InvalidCredentials,

    #[error("User {0} not found")]
    UserNotFound(UserId),

    #[error("Book {0} not found")]
    BookNotFound(BookId),

    #[error("Request {0} not found")]
    RequestNotFound(RequestId),

    #[error("Comment {0} not found")]
    CommentNotFound(CommentId),

    #[error("Review {0} not found")]
    ReviewNotFound(ReviewId),

    #[error("Book {0} is not owned by the requester")]
    NotListingOwner(BookId),

    #[error("Request {0} can only be completed by the seller of its book")]
    NotSellerOfRequestedBook(RequestId),

    #[error("Comment {0} was written by a different user")]
    NotCommentAuthor(CommentId),

    #[error("Review {0} was written by a different user")]
    NotReviewAuthor(ReviewId),

    #[error("Book {0} cannot be requested by its own seller")]
    SelfPurchase(BookId),

    #[error("Book {0} cannot be reviewed by its own seller")]
    SelfReview(BookId),

    #[error("Book {0} still has purchase requests against it")]
    ListingHasRequests(BookId),

    #[error("Database failure {0}")]
    DatabaseFailure(#[from] tokio_postgres::Error),

    #[error("Other error {0}")]
    Other(String),
}

#[async_trait::async_trait]
pub trait ExchangeRepository: Send + Sync {
    /// Registers a new account, storing a salted hash of the password.
    /// Fails with `UsernameTaken` if the username already exists.
    async fn register_account(
        &self,
        registration: RegistrationDetails,
    ) -> Result<UserId, ExchangeRepositoryError>;

    /// Verifies credentials and returns the account id.
    /// Fails with `InvalidCredentials` on unknown username or hash mismatch.
    async fn authenticate(
        &self,
        username: &str,
        password: &str,
    ) -> Result<UserId, ExchangeRepositoryError>;

    /// Adds a listing owned by `seller_id`, returns the assigned book id.
    async fn add_listing(
        &self,
        seller_id: UserId,
        listing: NewListing,
    ) -> Result<BookId, ExchangeRepositoryError>;

    /// Retrieves a single listing.
    async fn get_listing(&self, book_id: BookId) -> Result<Listing, ExchangeRepositoryError>;

    /// Lists all listings without review aggregates.
    async fn list_listings(&self) -> Result<Vec<Listing>, ExchangeRepositoryError>;

    /// Removes a listing and cascades its comments and reviews. Only the
    /// seller may remove it; removal is rejected while purchase requests
    /// reference the book.
    async fn remove_listing(
        &self,
        book_id: BookId,
        requester_id: UserId,
    ) -> Result<(), ExchangeRepositoryError>;

    /// All listings joined with seller username, mean rating and review
    /// count, ordered by book id.
    async fn list_listings_with_ratings(
        &self,
    ) -> Result<Vec<ListingSummary>, ExchangeRepositoryError>;

    /// A single listing with its review aggregates.
    async fn get_listing_with_ratings(
        &self,
        book_id: BookId,
    ) -> Result<ListingSummary, ExchangeRepositoryError>;

    /// Creates a purchase request in state `Requested` with the total frozen
    /// at the book's current price times the quantity.
    async fn create_request(
        &self,
        buyer_id: UserId,
        book_id: BookId,
        quantity: Quantity,
    ) -> Result<RequestId, ExchangeRepositoryError>;

    /// Transitions a request to `Completed`. Only the seller of the
    /// referenced book may complete it; completing an already completed
    /// request is a no-op.
    async fn complete_request(
        &self,
        request_id: RequestId,
        requester_id: UserId,
    ) -> Result<(), ExchangeRepositoryError>;

    /// Retrieves a single request for tracking.
    async fn get_request(
        &self,
        request_id: RequestId,
    ) -> Result<RequestRecord, ExchangeRepositoryError>;

    async fn list_requests_for_buyer(
        &self,
        buyer_id: UserId,
    ) -> Result<Vec<BuyerRequestView>, ExchangeRepositoryError>;

    async fn list_requests_for_seller(
        &self,
        seller_id: UserId,
    ) -> Result<Vec<SellerRequestView>, ExchangeRepositoryError>;

    async fn add_comment(
        &self,
        book_id: BookId,
        author_id: UserId,
        content: CommentText,
    ) -> Result<CommentId, ExchangeRepositoryError>;

    /// Comments on a book, newest first, with author usernames.
    async fn list_comments(
        &self,
        book_id: BookId,
    ) -> Result<Vec<CommentView>, ExchangeRepositoryError>;

    /// Deletes a comment; only its author may do so.
    async fn delete_comment(
        &self,
        comment_id: CommentId,
        requester_id: UserId,
    ) -> Result<(), ExchangeRepositoryError>;

    /// Inserts a review or overwrites the author's existing review of the
    /// same book in place (same id, new timestamp). Sellers cannot review
    /// their own books.
    async fn upsert_review(
        &self,
        book_id: BookId,
        author_id: UserId,
        rating: Rating,
        content: String,
    ) -> Result<ReviewId, ExchangeRepositoryError>;

    /// Reviews of a book, newest first, with author usernames.
    async fn list_reviews(
        &self,
        book_id: BookId,
    ) -> Result<Vec<ReviewView>, ExchangeRepositoryError>;

    /// The given user's review of the given book, if any.
    async fn find_review(
        &self,
        book_id: BookId,
        author_id: UserId,
    ) -> Result<Option<ReviewView>, ExchangeRepositoryError>;

    /// Deletes a review; only its author may do so.
    async fn delete_review(
        &self,
        review_id: ReviewId,
        requester_id: UserId,
    ) -> Result<(), ExchangeRepositoryError>;
}
