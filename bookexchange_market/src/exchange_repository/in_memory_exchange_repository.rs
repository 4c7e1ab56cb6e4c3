use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::time::UNIX_EPOCH;

use crate::api::{
    BookId, BuyerRequestView, CommentId, CommentText, CommentView, Listing, ListingSummary,
    NewListing, Quantity, Rating, RegistrationDetails, RequestId, RequestRecord, RequestStatus,
    ReviewId, ReviewView, SellerRequestView, UserId,
};
use crate::exchange_repository::{ExchangeRepository, ExchangeRepositoryError};
use crate::password;

#[derive(Debug, Clone)]
struct AccountRow {
    username: String,
    password_hash: String,
    email: String,
}

#[derive(Debug, Clone)]
struct BookRow {
    name: String,
    description: String,
    price: f64,
    semester: String,
    image_url: String,
    seller_id: UserId,
}

#[derive(Debug, Clone)]
struct RequestRow {
    buyer_id: UserId,
    book_id: BookId,
    quantity: i32,
    total: f64,
    status: RequestStatus,
}

#[derive(Debug, Clone)]
struct CommentRow {
    book_id: BookId,
    author_id: UserId,
    content: String,
    created_at: i64,
}

#[derive(Debug, Clone)]
struct ReviewRow {
    book_id: BookId,
    author_id: UserId,
    rating: i16,
    content: String,
    created_at: i64,
}

/// Compound operations take locks in a fixed order:
/// accounts -> books -> requests -> comments -> reviews.
pub struct InMemoryExchangeRepository {
    accounts: parking_lot::RwLock<HashMap<UserId, AccountRow>>,
    books: parking_lot::RwLock<HashMap<BookId, BookRow>>,
    requests: parking_lot::RwLock<HashMap<RequestId, RequestRow>>,
    comments: parking_lot::RwLock<HashMap<CommentId, CommentRow>>,
    reviews: parking_lot::RwLock<HashMap<ReviewId, ReviewRow>>,
    account_sequence: AtomicI32,
    book_sequence: AtomicI32,
    request_sequence: AtomicI32,
    comment_sequence: AtomicI32,
    review_sequence: AtomicI32,
}

impl Default for InMemoryExchangeRepository {
    fn default() -> Self {
        Self {
            accounts: Default::default(),
            books: Default::default(),
            requests: Default::default(),
            comments: Default::default(),
            reviews: Default::default(),
            account_sequence: Default::default(),
            book_sequence: Default::default(),
            request_sequence: Default::default(),
            comment_sequence: Default::default(),
            review_sequence: Default::default(),
        }
    }
}

fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64
}

fn listing_of(book_id: BookId, book: &BookRow) -> Listing {
    Listing {
        book_id,
        seller_id: book.seller_id,
        name: book.name.clone(),
        description: book.description.clone(),
        price: book.price,
        semester: book.semester.clone(),
        image_url: book.image_url.clone(),
    }
}

fn summary_of(
    accounts: &HashMap<UserId, AccountRow>,
    reviews: &HashMap<ReviewId, ReviewRow>,
    book_id: BookId,
    book: &BookRow,
) -> Result<ListingSummary, ExchangeRepositoryError> {
    let seller_username = accounts
        .get(&book.seller_id)
        .map(|account| account.username.clone())
        .ok_or_else(|| {
            ExchangeRepositoryError::Other(format!(
                "Seller {} missing for book {}",
                book.seller_id, book_id
            ))
        })?;

    let ratings: Vec<i64> = reviews
        .values()
        .filter(|review| review.book_id == book_id)
        .map(|review| review.rating as i64)
        .collect();
    let review_count = ratings.len() as i64;
    let avg_rating = if review_count == 0 {
        0.0
    } else {
        ratings.iter().sum::<i64>() as f64 / review_count as f64
    };

    Ok(ListingSummary {
        book_id,
        seller_id: book.seller_id,
        seller_username,
        name: book.name.clone(),
        description: book.description.clone(),
        price: book.price,
        semester: book.semester.clone(),
        image_url: book.image_url.clone(),
        avg_rating,
        review_count,
    })
}

#[async_trait::async_trait]
impl ExchangeRepository for InMemoryExchangeRepository {
    async fn register_account(
        &self,
        registration: RegistrationDetails,
    ) -> Result<UserId, ExchangeRepositoryError> {
        let password_hash = password::hash_password(&registration.password)
            .map_err(|err| ExchangeRepositoryError::Other(err.to_string()))?;

        let mut locked_accounts = self.accounts.write();
        if locked_accounts
            .values()
            .any(|account| account.username == registration.username)
        {
            return Err(ExchangeRepositoryError::UsernameTaken(
                registration.username,
            ));
        }

        let id = self.account_sequence.fetch_add(1, Ordering::Relaxed);
        locked_accounts.insert(
            id,
            AccountRow {
                username: registration.username,
                password_hash,
                email: registration.email,
            },
        );
        Ok(id)
    }

    async fn authenticate(
        &self,
        username: &str,
        password: &str,
    ) -> Result<UserId, ExchangeRepositoryError> {
        let locked_accounts = self.accounts.read();

        let (id, account) = locked_accounts
            .iter()
            .find(|(_, account)| account.username == username)
            .ok_or(ExchangeRepositoryError::InvalidCredentials)?;

        if password::verify_password(&account.password_hash, password) {
            Ok(*id)
        } else {
            Err(ExchangeRepositoryError::InvalidCredentials)
        }
    }

    async fn add_listing(
        &self,
        seller_id: UserId,
        listing: NewListing,
    ) -> Result<BookId, ExchangeRepositoryError> {
        let locked_accounts = self.accounts.read();
        if !locked_accounts.contains_key(&seller_id) {
            return Err(ExchangeRepositoryError::UserNotFound(seller_id));
        }

        let id = self.book_sequence.fetch_add(1, Ordering::Relaxed);
        self.books.write().insert(
            id,
            BookRow {
                name: listing.name,
                description: listing.description,
                price: listing.price.amount(),
                semester: listing.semester,
                image_url: listing.image_url,
                seller_id,
            },
        );
        Ok(id)
    }

    async fn get_listing(&self, book_id: BookId) -> Result<Listing, ExchangeRepositoryError> {
        self.books
            .read()
            .get(&book_id)
            .map(|book| listing_of(book_id, book))
            .ok_or(ExchangeRepositoryError::BookNotFound(book_id))
    }

    async fn list_listings(&self) -> Result<Vec<Listing>, ExchangeRepositoryError> {
        let mut listings: Vec<Listing> = self
            .books
            .read()
            .iter()
            .map(|(&book_id, book)| listing_of(book_id, book))
            .collect();
        listings.sort_by_key(|listing| listing.book_id);
        Ok(listings)
    }

    async fn remove_listing(
        &self,
        book_id: BookId,
        requester_id: UserId,
    ) -> Result<(), ExchangeRepositoryError> {
        let mut locked_books = self.books.write();

        let book = locked_books
            .get(&book_id)
            .ok_or(ExchangeRepositoryError::BookNotFound(book_id))?;
        if book.seller_id != requester_id {
            return Err(ExchangeRepositoryError::NotListingOwner(book_id));
        }
        if self
            .requests
            .read()
            .values()
            .any(|request| request.book_id == book_id)
        {
            return Err(ExchangeRepositoryError::ListingHasRequests(book_id));
        }

        self.comments
            .write()
            .retain(|_, comment| comment.book_id != book_id);
        self.reviews
            .write()
            .retain(|_, review| review.book_id != book_id);
        locked_books.remove(&book_id);
        Ok(())
    }

    async fn list_listings_with_ratings(
        &self,
    ) -> Result<Vec<ListingSummary>, ExchangeRepositoryError> {
        let locked_accounts = self.accounts.read();
        let locked_books = self.books.read();
        let locked_reviews = self.reviews.read();

        let mut summaries = locked_books
            .iter()
            .map(|(&book_id, book)| summary_of(&locked_accounts, &locked_reviews, book_id, book))
            .collect::<Result<Vec<_>, _>>()?;
        summaries.sort_by_key(|summary| summary.book_id);
        Ok(summaries)
    }

    async fn get_listing_with_ratings(
        &self,
        book_id: BookId,
    ) -> Result<ListingSummary, ExchangeRepositoryError> {
        let locked_accounts = self.accounts.read();
        let locked_books = self.books.read();
        let locked_reviews = self.reviews.read();

        let book = locked_books
            .get(&book_id)
            .ok_or(ExchangeRepositoryError::BookNotFound(book_id))?;
        summary_of(&locked_accounts, &locked_reviews, book_id, book)
    }

    async fn create_request(
        &self,
        buyer_id: UserId,
        book_id: BookId,
        quantity: Quantity,
    ) -> Result<RequestId, ExchangeRepositoryError> {
        let locked_accounts = self.accounts.read();
        if !locked_accounts.contains_key(&buyer_id) {
            return Err(ExchangeRepositoryError::UserNotFound(buyer_id));
        }

        let locked_books = self.books.read();
        let book = locked_books
            .get(&book_id)
            .ok_or(ExchangeRepositoryError::BookNotFound(book_id))?;
        if book.seller_id == buyer_id {
            return Err(ExchangeRepositoryError::SelfPurchase(book_id));
        }

        // Total is frozen here; later price edits never touch the ledger.
        let total = book.price * quantity.get() as f64;
        let id = self.request_sequence.fetch_add(1, Ordering::Relaxed);
        self.requests.write().insert(
            id,
            RequestRow {
                buyer_id,
                book_id,
                quantity: quantity.get(),
                total,
                status: RequestStatus::Requested,
            },
        );
        Ok(id)
    }

    async fn complete_request(
        &self,
        request_id: RequestId,
        requester_id: UserId,
    ) -> Result<(), ExchangeRepositoryError> {
        let locked_books = self.books.read();
        let mut locked_requests = self.requests.write();

        let request = locked_requests
            .get_mut(&request_id)
            .ok_or(ExchangeRepositoryError::RequestNotFound(request_id))?;
        let book = locked_books.get(&request.book_id).ok_or_else(|| {
            ExchangeRepositoryError::Other(format!(
                "Book {} missing for request {}",
                request.book_id, request_id
            ))
        })?;
        if book.seller_id != requester_id {
            return Err(ExchangeRepositoryError::NotSellerOfRequestedBook(
                request_id,
            ));
        }

        request.status = RequestStatus::Completed;
        Ok(())
    }

    async fn get_request(
        &self,
        request_id: RequestId,
    ) -> Result<RequestRecord, ExchangeRepositoryError> {
        self.requests
            .read()
            .get(&request_id)
            .map(|request| RequestRecord {
                request_id,
                buyer_id: request.buyer_id,
                book_id: request.book_id,
                quantity: request.quantity,
                total: request.total,
                status: request.status,
            })
            .ok_or(ExchangeRepositoryError::RequestNotFound(request_id))
    }

    async fn list_requests_for_buyer(
        &self,
        buyer_id: UserId,
    ) -> Result<Vec<BuyerRequestView>, ExchangeRepositoryError> {
        let locked_books = self.books.read();
        let locked_requests = self.requests.read();

        let mut views = Vec::new();
        for (&request_id, request) in locked_requests.iter() {
            if request.buyer_id != buyer_id {
                continue;
            }
            let book = locked_books.get(&request.book_id).ok_or_else(|| {
                ExchangeRepositoryError::Other(format!(
                    "Book {} missing for request {}",
                    request.book_id, request_id
                ))
            })?;
            views.push(BuyerRequestView {
                request_id,
                book_id: request.book_id,
                book_name: book.name.clone(),
                quantity: request.quantity,
                total: request.total,
                status: request.status,
            });
        }
        views.sort_by_key(|view| view.request_id);
        Ok(views)
    }

    async fn list_requests_for_seller(
        &self,
        seller_id: UserId,
    ) -> Result<Vec<SellerRequestView>, ExchangeRepositoryError> {
        let locked_accounts = self.accounts.read();
        let locked_books = self.books.read();
        let locked_requests = self.requests.read();

        let mut views = Vec::new();
        for (&request_id, request) in locked_requests.iter() {
            let Some(book) = locked_books.get(&request.book_id) else {
                continue;
            };
            if book.seller_id != seller_id {
                continue;
            }
            let buyer_username = locked_accounts
                .get(&request.buyer_id)
                .map(|account| account.username.clone())
                .ok_or_else(|| {
                    ExchangeRepositoryError::Other(format!(
                        "Buyer {} missing for request {}",
                        request.buyer_id, request_id
                    ))
                })?;
            views.push(SellerRequestView {
                request_id,
                book_id: request.book_id,
                book_name: book.name.clone(),
                buyer_id: request.buyer_id,
                buyer_username,
                quantity: request.quantity,
                total: request.total,
                status: request.status,
            });
        }
        views.sort_by_key(|view| view.request_id);
        Ok(views)
    }

    async fn add_comment(
        &self,
        book_id: BookId,
        author_id: UserId,
        content: CommentText,
    ) -> Result<CommentId, ExchangeRepositoryError> {
        let locked_accounts = self.accounts.read();
        if !locked_accounts.contains_key(&author_id) {
            return Err(ExchangeRepositoryError::UserNotFound(author_id));
        }
        if !self.books.read().contains_key(&book_id) {
            return Err(ExchangeRepositoryError::BookNotFound(book_id));
        }

        let id = self.comment_sequence.fetch_add(1, Ordering::Relaxed);
        self.comments.write().insert(
            id,
            CommentRow {
                book_id,
                author_id,
                content: content.into_string(),
                created_at: unix_now(),
            },
        );
        Ok(id)
    }

    async fn list_comments(
        &self,
        book_id: BookId,
    ) -> Result<Vec<CommentView>, ExchangeRepositoryError> {
        let locked_accounts = self.accounts.read();
        let locked_comments = self.comments.read();

        let mut views = Vec::new();
        for (&comment_id, comment) in locked_comments.iter() {
            if comment.book_id != book_id {
                continue;
            }
            let author_username = locked_accounts
                .get(&comment.author_id)
                .map(|account| account.username.clone())
                .ok_or_else(|| {
                    ExchangeRepositoryError::Other(format!(
                        "Author {} missing for comment {}",
                        comment.author_id, comment_id
                    ))
                })?;
            views.push(CommentView {
                comment_id,
                book_id,
                author_id: comment.author_id,
                author_username,
                content: comment.content.clone(),
                created_at: comment.created_at,
            });
        }
        // newest first; ids break ties within the same second
        views.sort_by(|a, b| {
            (b.created_at, b.comment_id).cmp(&(a.created_at, a.comment_id))
        });
        Ok(views)
    }

    async fn delete_comment(
        &self,
        comment_id: CommentId,
        requester_id: UserId,
    ) -> Result<(), ExchangeRepositoryError> {
        let mut locked_comments = self.comments.write();

        let comment = locked_comments
            .get(&comment_id)
            .ok_or(ExchangeRepositoryError::CommentNotFound(comment_id))?;
        if comment.author_id != requester_id {
            return Err(ExchangeRepositoryError::NotCommentAuthor(comment_id));
        }

        locked_comments.remove(&comment_id);
        Ok(())
    }

    async fn upsert_review(
        &self,
        book_id: BookId,
        author_id: UserId,
        rating: Rating,
        content: String,
    ) -> Result<ReviewId, ExchangeRepositoryError> {
        let locked_accounts = self.accounts.read();
        if !locked_accounts.contains_key(&author_id) {
            return Err(ExchangeRepositoryError::UserNotFound(author_id));
        }

        let locked_books = self.books.read();
        let book = locked_books
            .get(&book_id)
            .ok_or(ExchangeRepositoryError::BookNotFound(book_id))?;
        if book.seller_id == author_id {
            return Err(ExchangeRepositoryError::SelfReview(book_id));
        }

        let mut locked_reviews = self.reviews.write();
        let existing = locked_reviews
            .iter_mut()
            .find(|(_, review)| review.book_id == book_id && review.author_id == author_id);

        if let Some((&review_id, review)) = existing {
            review.rating = rating.get();
            review.content = content;
            review.created_at = unix_now();
            Ok(review_id)
        } else {
            let id = self.review_sequence.fetch_add(1, Ordering::Relaxed);
            locked_reviews.insert(
                id,
                ReviewRow {
                    book_id,
                    author_id,
                    rating: rating.get(),
                    content,
                    created_at: unix_now(),
                },
            );
            Ok(id)
        }
    }

    async fn list_reviews(
        &self,
        book_id: BookId,
    ) -> Result<Vec<ReviewView>, ExchangeRepositoryError> {
        let locked_accounts = self.accounts.read();
        let locked_reviews = self.reviews.read();

        let mut views = Vec::new();
        for (&review_id, review) in locked_reviews.iter() {
            if review.book_id != book_id {
                continue;
            }
            let author_username = locked_accounts
                .get(&review.author_id)
                .map(|account| account.username.clone())
                .ok_or_else(|| {
                    ExchangeRepositoryError::Other(format!(
                        "Author {} missing for review {}",
                        review.author_id, review_id
                    ))
                })?;
            views.push(ReviewView {
                review_id,
                book_id,
                author_id: review.author_id,
                author_username,
                rating: review.rating,
                content: review.content.clone(),
                created_at: review.created_at,
            });
        }
        views.sort_by(|a, b| (b.created_at, b.review_id).cmp(&(a.created_at, a.review_id)));
        Ok(views)
    }

    async fn find_review(
        &self,
        book_id: BookId,
        author_id: UserId,
    ) -> Result<Option<ReviewView>, ExchangeRepositoryError> {
        let reviews = self.list_reviews(book_id).await?;
        Ok(reviews
            .into_iter()
            .find(|review| review.author_id == author_id))
    }

    async fn delete_review(
        &self,
        review_id: ReviewId,
        requester_id: UserId,
    ) -> Result<(), ExchangeRepositoryError> {
        let mut locked_reviews = self.reviews.write();

        let review = locked_reviews
            .get(&review_id)
            .ok_or(ExchangeRepositoryError::ReviewNotFound(review_id))?;
        if review.author_id != requester_id {
            return Err(ExchangeRepositoryError::NotReviewAuthor(review_id));
        }

        locked_reviews.remove(&review_id);
        Ok(())
    }
}
