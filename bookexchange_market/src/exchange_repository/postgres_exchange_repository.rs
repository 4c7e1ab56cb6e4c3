use std::time::UNIX_EPOCH;

use anyhow::Context;
use tokio_postgres::error::SqlState;
use tokio_postgres::{Client, NoTls, Row, Statement};

use crate::api::{
    BookId, BuyerRequestView, CommentId, CommentText, CommentView, Listing, ListingSummary,
    NewListing, Quantity, Rating, RegistrationDetails, RequestId, RequestRecord, RequestStatus,
    ReviewId, ReviewView, SellerRequestView, UserId,
};
use crate::exchange_repository::{ExchangeRepository, ExchangeRepositoryError};
use crate::password;

pub struct PostgresExchangeRepositoryConfig {
    pub hostname: String,
    pub username: String,
    pub password: String,
}

pub struct PostgresExchangeRepository {
    client: Client,
}

impl PostgresExchangeRepository {
    pub async fn init(config: PostgresExchangeRepositoryConfig) -> anyhow::Result<Self> {
        let connection_str = format!(
            "postgresql://{}:{}@{}",
            config.username, config.password, config.hostname
        );
        tracing::info!("Postgres hostname: {}", config.hostname);
        let (client, connection) = tokio_postgres::connect(&connection_str, NoTls)
            .await
            .context("Failed to start postgres")?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                eprintln!("connection error: {}", e);
            }
        });

        client
            .batch_execute(
                "
        CREATE TABLE IF NOT EXISTS accounts (
            id              SERIAL PRIMARY KEY,
            username        TEXT NOT NULL UNIQUE,
            password_hash   TEXT NOT NULL,
            email           TEXT NOT NULL
            )
        ",
            )
            .await
            .context("Failed to setup accounts table")?;

        client
            .batch_execute(
                "
        CREATE TABLE IF NOT EXISTS books (
            id              SERIAL PRIMARY KEY,
            name            TEXT NOT NULL,
            description     TEXT NOT NULL,
            price           DOUBLE PRECISION NOT NULL,
            semester        TEXT NOT NULL,
            image_url       TEXT NOT NULL,
            seller_id       INTEGER NOT NULL REFERENCES accounts(id)
            )
        ",
            )
            .await
            .context("Failed to setup books table")?;

        client
            .batch_execute(
                "
        CREATE TABLE IF NOT EXISTS requests (
            id              SERIAL PRIMARY KEY,
            buyer_id        INTEGER NOT NULL REFERENCES accounts(id),
            book_id         INTEGER NOT NULL REFERENCES books(id),
            quantity        INTEGER NOT NULL,
            total           DOUBLE PRECISION NOT NULL,
            status          TEXT NOT NULL DEFAULT 'Requested'
            )
        ",
            )
            .await
            .context("Failed to setup requests table")?;

        client
            .batch_execute(
                "
        CREATE TABLE IF NOT EXISTS comments (
            id              SERIAL PRIMARY KEY,
            book_id         INTEGER NOT NULL REFERENCES books(id),
            user_id         INTEGER NOT NULL REFERENCES accounts(id),
            content         TEXT NOT NULL,
            created_at      BIGINT NOT NULL
            )
        ",
            )
            .await
            .context("Failed to setup comments table")?;

        client
            .batch_execute(
                "
        CREATE TABLE IF NOT EXISTS reviews (
            id              SERIAL PRIMARY KEY,
            book_id         INTEGER NOT NULL REFERENCES books(id),
            user_id         INTEGER NOT NULL REFERENCES accounts(id),
            rating          SMALLINT NOT NULL CHECK (rating >= 1 AND rating <= 5),
            content         TEXT NOT NULL,
            created_at      BIGINT NOT NULL,
            UNIQUE (book_id, user_id)
            )
        ",
            )
            .await
            .context("Failed to setup reviews table")?;

        Ok(Self { client })
    }
}

fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64
}

fn is_sql_state(err: &tokio_postgres::Error, code: &str) -> bool {
    err.as_db_error()
        .map(|db_err| db_err.code() == &SqlState::from_code(code))
        .unwrap_or_default()
}

fn parse_status(raw: &str) -> Result<RequestStatus, ExchangeRepositoryError> {
    match raw {
        "Requested" => Ok(RequestStatus::Requested),
        "Completed" => Ok(RequestStatus::Completed),
        other => Err(ExchangeRepositoryError::Other(format!(
            "Unknown request status {}",
            other
        ))),
    }
}

fn listing_from_row(row: &Row) -> Result<Listing, ExchangeRepositoryError> {
    Ok(Listing {
        book_id: row.try_get(0)?,
        name: row.try_get(1)?,
        description: row.try_get(2)?,
        price: row.try_get(3)?,
        semester: row.try_get(4)?,
        image_url: row.try_get(5)?,
        seller_id: row.try_get(6)?,
    })
}

fn summary_from_row(row: &Row) -> Result<ListingSummary, ExchangeRepositoryError> {
    Ok(ListingSummary {
        book_id: row.try_get(0)?,
        name: row.try_get(1)?,
        description: row.try_get(2)?,
        price: row.try_get(3)?,
        semester: row.try_get(4)?,
        image_url: row.try_get(5)?,
        seller_id: row.try_get(6)?,
        seller_username: row.try_get(7)?,
        avg_rating: row.try_get(8)?,
        review_count: row.try_get(9)?,
    })
}

const SUMMARY_SELECT: &str = "
    SELECT books.id, books.name, books.description, books.price, books.semester,
           books.image_url, books.seller_id, accounts.username,
           COALESCE(AVG(reviews.rating), 0)::DOUBLE PRECISION,
           COUNT(DISTINCT reviews.id)
    FROM books
    JOIN accounts ON books.seller_id = accounts.id
    LEFT JOIN reviews ON reviews.book_id = books.id
";

#[async_trait::async_trait]
impl ExchangeRepository for PostgresExchangeRepository {
    async fn register_account(
        &self,
        registration: RegistrationDetails,
    ) -> Result<UserId, ExchangeRepositoryError> {
        let password_hash = password::hash_password(&registration.password)
            .map_err(|err| ExchangeRepositoryError::Other(err.to_string()))?;

        let stmt: Statement = self
            .client
            .prepare(
                "INSERT INTO accounts (username, password_hash, email) VALUES ($1, $2, $3) \
                 RETURNING id",
            )
            .await?;

        let rows = self
            .client
            .query(
                &stmt,
                &[&registration.username, &password_hash, &registration.email],
            )
            .await;

        match rows {
            Ok(rows) => {
                let user_id: UserId = rows
                    .first()
                    .ok_or_else(|| ExchangeRepositoryError::Other("Id not returned".to_string()))?
                    .try_get(0)?;
                Ok(user_id)
            }
            // unique constraint violation on the username
            Err(err) if is_sql_state(&err, "23505") => Err(
                ExchangeRepositoryError::UsernameTaken(registration.username),
            ),
            Err(other_err) => Err(other_err.into()),
        }
    }

    async fn authenticate(
        &self,
        username: &str,
        password: &str,
    ) -> Result<UserId, ExchangeRepositoryError> {
        let stmt: Statement = self
            .client
            .prepare("SELECT id, password_hash FROM accounts WHERE username = $1")
            .await?;

        let rows = self.client.query(&stmt, &[&username]).await?;
        let row = rows
            .first()
            .ok_or(ExchangeRepositoryError::InvalidCredentials)?;

        let user_id: UserId = row.try_get(0)?;
        let stored_hash: String = row.try_get(1)?;

        if password::verify_password(&stored_hash, password) {
            Ok(user_id)
        } else {
            Err(ExchangeRepositoryError::InvalidCredentials)
        }
    }

    async fn add_listing(
        &self,
        seller_id: UserId,
        listing: NewListing,
    ) -> Result<BookId, ExchangeRepositoryError> {
        let stmt: Statement = self
            .client
            .prepare(
                "INSERT INTO books (name, description, price, semester, image_url, seller_id) \
                 VALUES ($1, $2, $3, $4, $5, $6) RETURNING id",
            )
            .await?;

        let rows = self
            .client
            .query(
                &stmt,
                &[
                    &listing.name,
                    &listing.description,
                    &listing.price.amount(),
                    &listing.semester,
                    &listing.image_url,
                    &seller_id,
                ],
            )
            .await;

        match rows {
            Ok(rows) => {
                let book_id: BookId = rows
                    .first()
                    .ok_or_else(|| ExchangeRepositoryError::Other("Id not returned".to_string()))?
                    .try_get(0)?;
                Ok(book_id)
            }
            // foreign key violation means the seller does not exist
            Err(err) if is_sql_state(&err, "23503") => {
                Err(ExchangeRepositoryError::UserNotFound(seller_id))
            }
            Err(other_err) => Err(other_err.into()),
        }
    }

    async fn get_listing(&self, book_id: BookId) -> Result<Listing, ExchangeRepositoryError> {
        let stmt: Statement = self
            .client
            .prepare(
                "SELECT id, name, description, price, semester, image_url, seller_id \
                 FROM books WHERE id = $1",
            )
            .await?;

        let rows = self.client.query(&stmt, &[&book_id]).await?;
        let row = rows
            .first()
            .ok_or(ExchangeRepositoryError::BookNotFound(book_id))?;
        listing_from_row(row)
    }

    async fn list_listings(&self) -> Result<Vec<Listing>, ExchangeRepositoryError> {
        let stmt: Statement = self
            .client
            .prepare(
                "SELECT id, name, description, price, semester, image_url, seller_id \
                 FROM books ORDER BY id",
            )
            .await?;

        let rows = self.client.query(&stmt, &[]).await?;
        rows.iter().map(listing_from_row).collect()
    }

    async fn remove_listing(
        &self,
        book_id: BookId,
        requester_id: UserId,
    ) -> Result<(), ExchangeRepositoryError> {
        // Ownership check, request guard and cascade run as one statement.
        let stmt: Statement = self
            .client
            .prepare(
                "WITH target AS (
                     SELECT id FROM books
                     WHERE id = $1 AND seller_id = $2
                       AND NOT EXISTS (SELECT 1 FROM requests WHERE requests.book_id = books.id)
                 ),
                 removed_comments AS (
                     DELETE FROM comments WHERE book_id IN (SELECT id FROM target)
                 ),
                 removed_reviews AS (
                     DELETE FROM reviews WHERE book_id IN (SELECT id FROM target)
                 )
                 DELETE FROM books WHERE id IN (SELECT id FROM target) RETURNING id",
            )
            .await?;

        let rows = self.client.query(&stmt, &[&book_id, &requester_id]).await?;
        if !rows.is_empty() {
            return Ok(());
        }

        let probe: Statement = self
            .client
            .prepare(
                "SELECT seller_id, EXISTS (SELECT 1 FROM requests WHERE book_id = $1) \
                 FROM books WHERE id = $1",
            )
            .await?;
        let rows = self.client.query(&probe, &[&book_id]).await?;
        let row = rows
            .first()
            .ok_or(ExchangeRepositoryError::BookNotFound(book_id))?;

        let seller_id: UserId = row.try_get(0)?;
        let has_requests: bool = row.try_get(1)?;
        if seller_id != requester_id {
            Err(ExchangeRepositoryError::NotListingOwner(book_id))
        } else if has_requests {
            Err(ExchangeRepositoryError::ListingHasRequests(book_id))
        } else {
            Err(ExchangeRepositoryError::Other(format!(
                "Removal of book {} raced with another writer",
                book_id
            )))
        }
    }

    async fn list_listings_with_ratings(
        &self,
    ) -> Result<Vec<ListingSummary>, ExchangeRepositoryError> {
        let query = format!(
            "{} GROUP BY books.id, accounts.username ORDER BY books.id",
            SUMMARY_SELECT
        );
        let stmt: Statement = self.client.prepare(&query).await?;
        let rows = self.client.query(&stmt, &[]).await?;
        rows.iter().map(summary_from_row).collect()
    }

    async fn get_listing_with_ratings(
        &self,
        book_id: BookId,
    ) -> Result<ListingSummary, ExchangeRepositoryError> {
        let query = format!(
            "{} WHERE books.id = $1 GROUP BY books.id, accounts.username",
            SUMMARY_SELECT
        );
        let stmt: Statement = self.client.prepare(&query).await?;
        let rows = self.client.query(&stmt, &[&book_id]).await?;
        let row = rows
            .first()
            .ok_or(ExchangeRepositoryError::BookNotFound(book_id))?;
        summary_from_row(row)
    }

    async fn create_request(
        &self,
        buyer_id: UserId,
        book_id: BookId,
        quantity: Quantity,
    ) -> Result<RequestId, ExchangeRepositoryError> {
        // Guarded insert freezes the total at the current price atomically.
        let stmt: Statement = self
            .client
            .prepare(
                "INSERT INTO requests (buyer_id, book_id, quantity, total, status)
                 SELECT $1, books.id, $2, books.price * $2, 'Requested'
                 FROM books WHERE books.id = $3 AND books.seller_id <> $1
                 RETURNING id",
            )
            .await?;

        let rows = self
            .client
            .query(&stmt, &[&buyer_id, &quantity.get(), &book_id])
            .await;

        let rows = match rows {
            Ok(rows) => rows,
            Err(err) if is_sql_state(&err, "23503") => {
                return Err(ExchangeRepositoryError::UserNotFound(buyer_id));
            }
            Err(other_err) => return Err(other_err.into()),
        };

        if let Some(row) = rows.first() {
            return Ok(row.try_get(0)?);
        }

        let probe: Statement = self
            .client
            .prepare("SELECT seller_id FROM books WHERE id = $1")
            .await?;
        let rows = self.client.query(&probe, &[&book_id]).await?;
        let row = rows
            .first()
            .ok_or(ExchangeRepositoryError::BookNotFound(book_id))?;
        let seller_id: UserId = row.try_get(0)?;
        if seller_id == buyer_id {
            Err(ExchangeRepositoryError::SelfPurchase(book_id))
        } else {
            Err(ExchangeRepositoryError::Other(format!(
                "Request creation for book {} raced with another writer",
                book_id
            )))
        }
    }

    async fn complete_request(
        &self,
        request_id: RequestId,
        requester_id: UserId,
    ) -> Result<(), ExchangeRepositoryError> {
        // Seller lookup and transition in one statement; re-completion is a
        // no-op because the update is unconditional on the current status.
        let stmt: Statement = self
            .client
            .prepare(
                "UPDATE requests SET status = 'Completed'
                 FROM books
                 WHERE requests.id = $1
                   AND books.id = requests.book_id
                   AND books.seller_id = $2
                 RETURNING requests.id",
            )
            .await?;

        let rows = self
            .client
            .query(&stmt, &[&request_id, &requester_id])
            .await?;
        if !rows.is_empty() {
            return Ok(());
        }

        let probe: Statement = self
            .client
            .prepare("SELECT 1 FROM requests WHERE id = $1")
            .await?;
        let rows = self.client.query(&probe, &[&request_id]).await?;
        if rows.is_empty() {
            Err(ExchangeRepositoryError::RequestNotFound(request_id))
        } else {
            Err(ExchangeRepositoryError::NotSellerOfRequestedBook(
                request_id,
            ))
        }
    }

    async fn get_request(
        &self,
        request_id: RequestId,
    ) -> Result<RequestRecord, ExchangeRepositoryError> {
        let stmt: Statement = self
            .client
            .prepare(
                "SELECT buyer_id, book_id, quantity, total, status \
                 FROM requests WHERE id = $1",
            )
            .await?;

        let rows = self.client.query(&stmt, &[&request_id]).await?;
        let row = rows
            .first()
            .ok_or(ExchangeRepositoryError::RequestNotFound(request_id))?;

        let status: String = row.try_get(4)?;
        Ok(RequestRecord {
            request_id,
            buyer_id: row.try_get(0)?,
            book_id: row.try_get(1)?,
            quantity: row.try_get(2)?,
            total: row.try_get(3)?,
            status: parse_status(&status)?,
        })
    }

    async fn list_requests_for_buyer(
        &self,
        buyer_id: UserId,
    ) -> Result<Vec<BuyerRequestView>, ExchangeRepositoryError> {
        let stmt: Statement = self
            .client
            .prepare(
                "SELECT requests.id, requests.book_id, books.name, requests.quantity,
                        requests.total, requests.status
                 FROM requests
                 JOIN books ON requests.book_id = books.id
                 WHERE requests.buyer_id = $1
                 ORDER BY requests.id",
            )
            .await?;

        let rows = self.client.query(&stmt, &[&buyer_id]).await?;
        rows.iter()
            .map(|row| {
                let status: String = row.try_get(5)?;
                Ok(BuyerRequestView {
                    request_id: row.try_get(0)?,
                    book_id: row.try_get(1)?,
                    book_name: row.try_get(2)?,
                    quantity: row.try_get(3)?,
                    total: row.try_get(4)?,
                    status: parse_status(&status)?,
                })
            })
            .collect()
    }

    async fn list_requests_for_seller(
        &self,
        seller_id: UserId,
    ) -> Result<Vec<SellerRequestView>, ExchangeRepositoryError> {
        let stmt: Statement = self
            .client
            .prepare(
                "SELECT requests.id, requests.book_id, books.name, requests.buyer_id,
                        accounts.username, requests.quantity, requests.total, requests.status
                 FROM requests
                 JOIN books ON requests.book_id = books.id
                 JOIN accounts ON requests.buyer_id = accounts.id
                 WHERE books.seller_id = $1
                 ORDER BY requests.id",
            )
            .await?;

        let rows = self.client.query(&stmt, &[&seller_id]).await?;
        rows.iter()
            .map(|row| {
                let status: String = row.try_get(7)?;
                Ok(SellerRequestView {
                    request_id: row.try_get(0)?,
                    book_id: row.try_get(1)?,
                    book_name: row.try_get(2)?,
                    buyer_id: row.try_get(3)?,
                    buyer_username: row.try_get(4)?,
                    quantity: row.try_get(5)?,
                    total: row.try_get(6)?,
                    status: parse_status(&status)?,
                })
            })
            .collect()
    }

    async fn add_comment(
        &self,
        book_id: BookId,
        author_id: UserId,
        content: CommentText,
    ) -> Result<CommentId, ExchangeRepositoryError> {
        let stmt: Statement = self
            .client
            .prepare(
                "INSERT INTO comments (book_id, user_id, content, created_at)
                 SELECT books.id, $2, $3, $4 FROM books WHERE books.id = $1
                 RETURNING id",
            )
            .await?;

        let rows = self
            .client
            .query(
                &stmt,
                &[&book_id, &author_id, &content.as_str(), &unix_now()],
            )
            .await;

        match rows {
            Ok(rows) => rows
                .first()
                .ok_or(ExchangeRepositoryError::BookNotFound(book_id))?
                .try_get(0)
                .map_err(Into::into),
            Err(err) if is_sql_state(&err, "23503") => {
                Err(ExchangeRepositoryError::UserNotFound(author_id))
            }
            Err(other_err) => Err(other_err.into()),
        }
    }

    async fn list_comments(
        &self,
        book_id: BookId,
    ) -> Result<Vec<CommentView>, ExchangeRepositoryError> {
        let stmt: Statement = self
            .client
            .prepare(
                "SELECT comments.id, comments.user_id, accounts.username, comments.content,
                        comments.created_at
                 FROM comments
                 JOIN accounts ON comments.user_id = accounts.id
                 WHERE comments.book_id = $1
                 ORDER BY comments.created_at DESC, comments.id DESC",
            )
            .await?;

        let rows = self.client.query(&stmt, &[&book_id]).await?;
        rows.iter()
            .map(|row| {
                Ok(CommentView {
                    comment_id: row.try_get(0)?,
                    book_id,
                    author_id: row.try_get(1)?,
                    author_username: row.try_get(2)?,
                    content: row.try_get(3)?,
                    created_at: row.try_get(4)?,
                })
            })
            .collect()
    }

    async fn delete_comment(
        &self,
        comment_id: CommentId,
        requester_id: UserId,
    ) -> Result<(), ExchangeRepositoryError> {
        let stmt: Statement = self
            .client
            .prepare("DELETE FROM comments WHERE id = $1 AND user_id = $2 RETURNING id")
            .await?;

        let rows = self
            .client
            .query(&stmt, &[&comment_id, &requester_id])
            .await?;
        if !rows.is_empty() {
            return Ok(());
        }

        let probe: Statement = self
            .client
            .prepare("SELECT 1 FROM comments WHERE id = $1")
            .await?;
        let rows = self.client.query(&probe, &[&comment_id]).await?;
        if rows.is_empty() {
            Err(ExchangeRepositoryError::CommentNotFound(comment_id))
        } else {
            Err(ExchangeRepositoryError::NotCommentAuthor(comment_id))
        }
    }

    async fn upsert_review(
        &self,
        book_id: BookId,
        author_id: UserId,
        rating: Rating,
        content: String,
    ) -> Result<ReviewId, ExchangeRepositoryError> {
        // Guarded insert-or-overwrite keyed on the (book_id, user_id)
        // uniqueness constraint; the id of an overwritten review survives.
        let stmt: Statement = self
            .client
            .prepare(
                "INSERT INTO reviews (book_id, user_id, rating, content, created_at)
                 SELECT books.id, $2, $3, $4, $5
                 FROM books WHERE books.id = $1 AND books.seller_id <> $2
                 ON CONFLICT (book_id, user_id)
                 DO UPDATE SET rating = EXCLUDED.rating, content = EXCLUDED.content,
                               created_at = EXCLUDED.created_at
                 RETURNING id",
            )
            .await?;

        let rows = self
            .client
            .query(
                &stmt,
                &[&book_id, &author_id, &rating.get(), &content, &unix_now()],
            )
            .await;

        let rows = match rows {
            Ok(rows) => rows,
            Err(err) if is_sql_state(&err, "23503") => {
                return Err(ExchangeRepositoryError::UserNotFound(author_id));
            }
            Err(other_err) => return Err(other_err.into()),
        };

        if let Some(row) = rows.first() {
            return Ok(row.try_get(0)?);
        }

        let probe: Statement = self
            .client
            .prepare("SELECT seller_id FROM books WHERE id = $1")
            .await?;
        let rows = self.client.query(&probe, &[&book_id]).await?;
        let row = rows
            .first()
            .ok_or(ExchangeRepositoryError::BookNotFound(book_id))?;
        let seller_id: UserId = row.try_get(0)?;
        if seller_id == author_id {
            Err(ExchangeRepositoryError::SelfReview(book_id))
        } else {
            Err(ExchangeRepositoryError::Other(format!(
                "Review upsert for book {} raced with another writer",
                book_id
            )))
        }
    }

    async fn list_reviews(
        &self,
        book_id: BookId,
    ) -> Result<Vec<ReviewView>, ExchangeRepositoryError> {
        let stmt: Statement = self
            .client
            .prepare(
                "SELECT reviews.id, reviews.user_id, accounts.username, reviews.rating,
                        reviews.content, reviews.created_at
                 FROM reviews
                 JOIN accounts ON reviews.user_id = accounts.id
                 WHERE reviews.book_id = $1
                 ORDER BY reviews.created_at DESC, reviews.id DESC",
            )
            .await?;

        let rows = self.client.query(&stmt, &[&book_id]).await?;
        rows.iter()
            .map(|row| {
                Ok(ReviewView {
                    review_id: row.try_get(0)?,
                    book_id,
                    author_id: row.try_get(1)?,
                    author_username: row.try_get(2)?,
                    rating: row.try_get(3)?,
                    content: row.try_get(4)?,
                    created_at: row.try_get(5)?,
                })
            })
            .collect()
    }

    async fn find_review(
        &self,
        book_id: BookId,
        author_id: UserId,
    ) -> Result<Option<ReviewView>, ExchangeRepositoryError> {
        let stmt: Statement = self
            .client
            .prepare(
                "SELECT reviews.id, accounts.username, reviews.rating, reviews.content,
                        reviews.created_at
                 FROM reviews
                 JOIN accounts ON reviews.user_id = accounts.id
                 WHERE reviews.book_id = $1 AND reviews.user_id = $2",
            )
            .await?;

        let rows = self.client.query(&stmt, &[&book_id, &author_id]).await?;
        rows.first()
            .map(|row| {
                Ok(ReviewView {
                    review_id: row.try_get(0)?,
                    book_id,
                    author_id,
                    author_username: row.try_get(1)?,
                    rating: row.try_get(2)?,
                    content: row.try_get(3)?,
                    created_at: row.try_get(4)?,
                })
            })
            .transpose()
    }

    async fn delete_review(
        &self,
        review_id: ReviewId,
        requester_id: UserId,
    ) -> Result<(), ExchangeRepositoryError> {
        let stmt: Statement = self
            .client
            .prepare("DELETE FROM reviews WHERE id = $1 AND user_id = $2 RETURNING id")
            .await?;

        let rows = self
            .client
            .query(&stmt, &[&review_id, &requester_id])
            .await?;
        if !rows.is_empty() {
            return Ok(());
        }

        let probe: Statement = self
            .client
            .prepare("SELECT 1 FROM reviews WHERE id = $1")
            .await?;
        let rows = self.client.query(&probe, &[&review_id]).await?;
        if rows.is_empty() {
            Err(ExchangeRepositoryError::ReviewNotFound(review_id))
        } else {
            Err(ExchangeRepositoryError::NotReviewAuthor(review_id))
        }
    }
}

#[cfg(test)]
mod tests_postgres_exchange_repository {
    use serial_test::file_serial;
    use testcontainers::core::IntoContainerPort;
    use testcontainers::runners::AsyncRunner;
    use testcontainers::{ContainerAsync, GenericImage, ImageExt};

    use crate::api::{ListingForm, RequestStatus};

    use super::*;

    async fn start_postgres_container_and_init_repo(
    ) -> (ContainerAsync<GenericImage>, PostgresExchangeRepository) {
        let _pg_container = GenericImage::new("postgres", "latest")
            .with_mapped_port(5432, 5432.tcp())
            .with_env_var("POSTGRES_USER", "postgres")
            .with_env_var("POSTGRES_PASSWORD", "postgres")
            .start()
            .await
            .expect("Failed to start postgres");

        for _ in 0..10 {
            if let Ok(repo) =
                PostgresExchangeRepository::init(PostgresExchangeRepositoryConfig {
                    hostname: "127.0.0.1".to_string(),
                    username: "postgres".to_string(),
                    password: "postgres".to_string(),
                })
                .await
            {
                return (_pg_container, repo);
            }
            tokio::time::sleep(std::time::Duration::from_millis(300)).await;
        }
        panic!("Failed to setup postgres container")
    }

    fn registration(username: &str) -> RegistrationDetails {
        RegistrationDetails {
            username: username.to_string(),
            password: format!("{username}-password"),
            email: format!("{username}@campus.example"),
        }
    }

    fn listing(name: &str, price: f64) -> NewListing {
        NewListing::try_from(ListingForm {
            name: name.to_string(),
            description: "Good condition".to_string(),
            price,
            semester: "Semester 1".to_string(),
            image_url: format!("https://img.example/{name}.png"),
        })
        .unwrap()
    }

    #[tokio::test]
    #[ignore = "needs a local docker daemon"]
    #[file_serial(key, path => "../.pgtestslock")]
    /// Accounts and catalog against a real postgres:
    /// 1. Registers, rejects the duplicate username, authenticates
    /// 2. Adds listings, reads them back, lists with aggregates
    /// 3. Removal authorization and cascade of comments/reviews
    async fn test_accounts_and_catalog() {
        let (_container, repository) = start_postgres_container_and_init_repo().await;

        let seller_id = repository
            .register_account(registration("seller"))
            .await
            .unwrap();
        let buyer_id = repository
            .register_account(registration("buyer"))
            .await
            .unwrap();

        let duplicate = repository.register_account(registration("seller")).await;
        assert!(matches!(
            duplicate,
            Err(ExchangeRepositoryError::UsernameTaken(..))
        ));

        assert_eq!(
            repository
                .authenticate("seller", "seller-password")
                .await
                .unwrap(),
            seller_id
        );
        assert!(matches!(
            repository.authenticate("seller", "wrong").await,
            Err(ExchangeRepositoryError::InvalidCredentials)
        ));

        let book_id = repository
            .add_listing(seller_id, listing("Engineering Mathematics I", 350.0))
            .await
            .unwrap();

        let returned = repository.get_listing(book_id).await.unwrap();
        assert_eq!(returned.name, "Engineering Mathematics I");
        assert_eq!(returned.price, 350.0);
        assert_eq!(returned.seller_id, seller_id);

        repository
            .add_comment(book_id, buyer_id, CommentText::new("available?").unwrap())
            .await
            .unwrap();
        repository
            .upsert_review(book_id, buyer_id, Rating::new(4).unwrap(), "ok".to_string())
            .await
            .unwrap();

        let summaries = repository.list_listings_with_ratings().await.unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].avg_rating, 4.0);
        assert_eq!(summaries[0].review_count, 1);
        assert_eq!(summaries[0].seller_username, "seller");

        let not_owner = repository.remove_listing(book_id, buyer_id).await;
        assert!(matches!(
            not_owner,
            Err(ExchangeRepositoryError::NotListingOwner(..))
        ));

        repository.remove_listing(book_id, seller_id).await.unwrap();
        assert!(matches!(
            repository.get_listing(book_id).await,
            Err(ExchangeRepositoryError::BookNotFound(..))
        ));
        assert_eq!(repository.list_comments(book_id).await.unwrap(), vec![]);
        assert_eq!(repository.list_reviews(book_id).await.unwrap(), vec![]);
    }

    #[tokio::test]
    #[ignore = "needs a local docker daemon"]
    #[file_serial(key, path => "../.pgtestslock")]
    /// Request ledger and reviews against a real postgres:
    /// 1. Self-purchase and self-review rejections
    /// 2. Frozen total, buyer/seller projections
    /// 3. Removal blocked while a request exists
    /// 4. Completion authorization, idempotent re-completion
    /// 5. Review upsert keeps a single row per (book, user)
    async fn test_request_ledger_and_reviews() {
        let (_container, repository) = start_postgres_container_and_init_repo().await;

        let seller_id = repository
            .register_account(registration("ledger_seller"))
            .await
            .unwrap();
        let buyer_id = repository
            .register_account(registration("ledger_buyer"))
            .await
            .unwrap();
        let book_id = repository
            .add_listing(seller_id, listing("Book X", 100.0))
            .await
            .unwrap();

        assert!(matches!(
            repository
                .create_request(seller_id, book_id, Quantity::new(1).unwrap())
                .await,
            Err(ExchangeRepositoryError::SelfPurchase(..))
        ));
        assert!(matches!(
            repository
                .upsert_review(book_id, seller_id, Rating::new(5).unwrap(), "mine".to_string())
                .await,
            Err(ExchangeRepositoryError::SelfReview(..))
        ));

        let request_id = repository
            .create_request(buyer_id, book_id, Quantity::new(2).unwrap())
            .await
            .unwrap();
        let record = repository.get_request(request_id).await.unwrap();
        assert_eq!(record.total, 200.0);
        assert_eq!(record.status, RequestStatus::Requested);

        assert!(matches!(
            repository.remove_listing(book_id, seller_id).await,
            Err(ExchangeRepositoryError::ListingHasRequests(..))
        ));

        assert!(matches!(
            repository.complete_request(request_id, buyer_id).await,
            Err(ExchangeRepositoryError::NotSellerOfRequestedBook(..))
        ));

        repository
            .complete_request(request_id, seller_id)
            .await
            .unwrap();
        repository
            .complete_request(request_id, seller_id)
            .await
            .unwrap();
        assert_eq!(
            repository.get_request(request_id).await.unwrap().status,
            RequestStatus::Completed
        );

        let buyer_view = repository.list_requests_for_buyer(buyer_id).await.unwrap();
        assert_eq!(buyer_view.len(), 1);
        assert_eq!(buyer_view[0].book_name, "Book X");

        let seller_view = repository
            .list_requests_for_seller(seller_id)
            .await
            .unwrap();
        assert_eq!(seller_view.len(), 1);
        assert_eq!(seller_view[0].buyer_username, "ledger_buyer");

        let first = repository
            .upsert_review(book_id, buyer_id, Rating::new(2).unwrap(), "meh".to_string())
            .await
            .unwrap();
        let second = repository
            .upsert_review(book_id, buyer_id, Rating::new(5).unwrap(), "grew on me".to_string())
            .await
            .unwrap();
        assert_eq!(first, second);

        let reviews = repository.list_reviews(book_id).await.unwrap();
        assert_eq!(reviews.len(), 1);
        assert_eq!(reviews[0].rating, 5);

        let own = repository
            .find_review(book_id, buyer_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(own.content, "grew on me");
    }
}
