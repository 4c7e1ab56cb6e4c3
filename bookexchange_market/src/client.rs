use anyhow::{bail, Context};
use reqwest::header::LOCATION;
use reqwest::StatusCode;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware, RequestBuilder};
use reqwest_tracing::TracingMiddleware;

use crate::api::{
    AuthenticatedId, BookId, BuyerRequestView, CommentForm, CommentId, Credentials, ListingForm,
    ListingPage, ListingsResponse, RegistrationDetails, RequestForm, RequestId, RequestRecord,
    ReviewForm, ReviewId, SellerRequestView, UserId, USER_ID_HEADER,
};

pub struct BookExchangeClient {
    url: String,
    client: ClientWithMiddleware,
}

impl BookExchangeClient {
    pub fn new(url: &str) -> anyhow::Result<Self> {
        let reqwest_client = reqwest::Client::builder()
            .build()
            .context("Failed to build reqwest client")?;
        let client = ClientBuilder::new(reqwest_client)
            // Insert the tracing middleware
            .with(TracingMiddleware::default())
            .build();

        Ok(Self {
            url: url.to_string(),
            client,
        })
    }

    fn as_user(builder: RequestBuilder, user_id: UserId) -> RequestBuilder {
        builder.header(USER_ID_HEADER, user_id.to_string())
    }

    /// Calls POST /api/register endpoint
    /// Returns the id of the new account
    pub async fn register(&self, registration: RegistrationDetails) -> anyhow::Result<UserId> {
        let response = self
            .client
            .post(format!("{}/api/register", self.url))
            .json(&registration)
            .send()
            .await?;

        if !response.status().is_success() {
            let error: String = response.json().await.unwrap_or_default();
            bail!("Failed to register {}", error)
        }

        let authenticated: AuthenticatedId = response.json().await?;
        Ok(authenticated.user_id)
    }

    /// Calls POST /api/login endpoint
    /// Returns the account id on success and None on bad credentials
    pub async fn login(&self, credentials: Credentials) -> anyhow::Result<Option<UserId>> {
        let response = self
            .client
            .post(format!("{}/api/login", self.url))
            .json(&credentials)
            .send()
            .await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            Ok(None)
        } else if response.status().is_success() {
            let authenticated: AuthenticatedId = response.json().await?;
            Ok(Some(authenticated.user_id))
        } else {
            let error: String = response.json().await.unwrap_or_default();
            bail!("Failed to login {}", error)
        }
    }

    /// Calls POST /api/book endpoint
    /// Returns the book_id of the created listing from the location header
    pub async fn add_book(&self, user_id: UserId, form: ListingForm) -> anyhow::Result<BookId> {
        let response = Self::as_user(
            self.client.post(format!("{}/api/book", self.url)),
            user_id,
        )
        .json(&form)
        .send()
        .await?;

        if !response.status().is_success() {
            let error: String = response.json().await.unwrap_or_default();
            bail!("Failed to add book {}", error)
        }

        let location_header = response
            .headers()
            .get(LOCATION)
            .context("No location header")?;

        location_header
            .to_str()
            .context("Failed to convert header to str")?
            .strip_prefix("/api/book/")
            .context("Invalid location header")?
            .parse()
            .context("Failed to parse book id")
    }

    /// Calls GET /api/books endpoint
    pub async fn list_books(&self, user_id: UserId) -> anyhow::Result<ListingsResponse> {
        let response = Self::as_user(
            self.client.get(format!("{}/api/books", self.url)),
            user_id,
        )
        .send()
        .await?;
        if response.status().is_success() {
            Ok(response.json().await?)
        } else {
            let error: String = response.json().await.unwrap_or_default();
            bail!("Failed to list books {}", error)
        }
    }

    /// Calls GET /api/book/{book_id}/page endpoint
    /// Returns the assembled book page if the book exists
    /// None if the book was not in the repository
    /// and error in case of any other failure
    pub async fn get_book_page(
        &self,
        user_id: UserId,
        book_id: BookId,
    ) -> anyhow::Result<Option<ListingPage>> {
        let response = Self::as_user(
            self.client
                .get(format!("{}/api/book/{}/page", self.url, book_id)),
            user_id,
        )
        .send()
        .await?;
        if response.status() == StatusCode::NOT_FOUND {
            Ok(None)
        } else if response.status().is_success() {
            Ok(Some(response.json().await?))
        } else {
            let error: String = response.json().await.unwrap_or_default();
            bail!("Failed to get book page {}", error)
        }
    }

    /// Calls DELETE /api/book/{book_id} endpoint
    /// Returns true if removed and false if the caller is not the seller or
    /// the book still has purchase requests
    pub async fn remove_book(&self, user_id: UserId, book_id: BookId) -> anyhow::Result<bool> {
        let response = Self::as_user(
            self.client
                .delete(format!("{}/api/book/{}", self.url, book_id)),
            user_id,
        )
        .send()
        .await?;

        if response.status() == StatusCode::FORBIDDEN || response.status() == StatusCode::CONFLICT {
            Ok(false)
        } else if response.status().is_success() {
            Ok(true)
        } else {
            let error: String = response.json().await.unwrap_or_default();
            bail!("Failed to remove book {}", error)
        }
    }

    /// Calls POST /api/request endpoint
    /// Returns the request_id of the created request from the location header
    pub async fn create_request(
        &self,
        user_id: UserId,
        form: RequestForm,
    ) -> anyhow::Result<RequestId> {
        let response = Self::as_user(
            self.client.post(format!("{}/api/request", self.url)),
            user_id,
        )
        .json(&form)
        .send()
        .await?;

        if !response.status().is_success() {
            let error: String = response.json().await.unwrap_or_default();
            bail!("Failed to create request {}", error)
        }

        let location_header = response
            .headers()
            .get(LOCATION)
            .context("No location header")?;

        location_header
            .to_str()
            .context("Failed to convert header to str")?
            .strip_prefix("/api/request/")
            .context("Invalid location header")?
            .parse()
            .context("Failed to parse request id")
    }

    /// Calls GET /api/request/{request_id} endpoint
    pub async fn track_request(
        &self,
        user_id: UserId,
        request_id: RequestId,
    ) -> anyhow::Result<RequestRecord> {
        let response = Self::as_user(
            self.client
                .get(format!("{}/api/request/{}", self.url, request_id)),
            user_id,
        )
        .send()
        .await?;
        if response.status().is_success() {
            Ok(response.json().await?)
        } else {
            let error: String = response.json().await.unwrap_or_default();
            bail!("Failed to track request {}", error)
        }
    }

    /// Calls POST /api/request/{request_id}/complete endpoint
    /// Returns true if completed and false if the caller is not the seller
    pub async fn complete_request(
        &self,
        user_id: UserId,
        request_id: RequestId,
    ) -> anyhow::Result<bool> {
        let response = Self::as_user(
            self.client
                .post(format!("{}/api/request/{}/complete", self.url, request_id)),
            user_id,
        )
        .send()
        .await?;

        if response.status() == StatusCode::FORBIDDEN {
            Ok(false)
        } else if response.status().is_success() {
            Ok(true)
        } else {
            let error: String = response.json().await.unwrap_or_default();
            bail!("Failed to complete request {}", error)
        }
    }

    /// Calls GET /api/requests/buyer endpoint
    pub async fn buyer_requests(&self, user_id: UserId) -> anyhow::Result<Vec<BuyerRequestView>> {
        let response = Self::as_user(
            self.client
                .get(format!("{}/api/requests/buyer", self.url)),
            user_id,
        )
        .send()
        .await?;
        if response.status().is_success() {
            Ok(response.json().await?)
        } else {
            let error: String = response.json().await.unwrap_or_default();
            bail!("Failed to list buyer requests {}", error)
        }
    }

    /// Calls GET /api/requests/seller endpoint
    pub async fn seller_requests(
        &self,
        user_id: UserId,
    ) -> anyhow::Result<Vec<SellerRequestView>> {
        let response = Self::as_user(
            self.client
                .get(format!("{}/api/requests/seller", self.url)),
            user_id,
        )
        .send()
        .await?;
        if response.status().is_success() {
            Ok(response.json().await?)
        } else {
            let error: String = response.json().await.unwrap_or_default();
            bail!("Failed to list seller requests {}", error)
        }
    }

    /// Calls POST /api/book/{book_id}/comment endpoint
    pub async fn add_comment(
        &self,
        user_id: UserId,
        book_id: BookId,
        form: CommentForm,
    ) -> anyhow::Result<CommentId> {
        let response = Self::as_user(
            self.client
                .post(format!("{}/api/book/{}/comment", self.url, book_id)),
            user_id,
        )
        .json(&form)
        .send()
        .await?;
        if response.status().is_success() {
            Ok(response.json().await?)
        } else {
            let error: String = response.json().await.unwrap_or_default();
            bail!("Failed to add comment {}", error)
        }
    }

    /// Calls DELETE /api/comment/{comment_id} endpoint
    /// Returns true if deleted and false if the caller is not the author
    pub async fn delete_comment(
        &self,
        user_id: UserId,
        comment_id: CommentId,
    ) -> anyhow::Result<bool> {
        let response = Self::as_user(
            self.client
                .delete(format!("{}/api/comment/{}", self.url, comment_id)),
            user_id,
        )
        .send()
        .await?;
        if response.status() == StatusCode::FORBIDDEN {
            Ok(false)
        } else if response.status().is_success() {
            Ok(true)
        } else {
            let error: String = response.json().await.unwrap_or_default();
            bail!("Failed to delete comment {}", error)
        }
    }

    /// Calls PUT /api/book/{book_id}/review endpoint
    /// Creating or overwriting the caller's review of the book
    pub async fn put_review(
        &self,
        user_id: UserId,
        book_id: BookId,
        form: ReviewForm,
    ) -> anyhow::Result<ReviewId> {
        let response = Self::as_user(
            self.client
                .put(format!("{}/api/book/{}/review", self.url, book_id)),
            user_id,
        )
        .json(&form)
        .send()
        .await?;
        if response.status().is_success() {
            Ok(response.json().await?)
        } else {
            let error: String = response.json().await.unwrap_or_default();
            bail!("Failed to put review {}", error)
        }
    }

    /// Calls DELETE /api/review/{review_id} endpoint
    /// Returns true if deleted and false if the caller is not the author
    pub async fn delete_review(
        &self,
        user_id: UserId,
        review_id: ReviewId,
    ) -> anyhow::Result<bool> {
        let response = Self::as_user(
            self.client
                .delete(format!("{}/api/review/{}", self.url, review_id)),
            user_id,
        )
        .send()
        .await?;
        if response.status() == StatusCode::FORBIDDEN {
            Ok(false)
        } else if response.status().is_success() {
            Ok(true)
        } else {
            let error: String = response.json().await.unwrap_or_default();
            bail!("Failed to delete review {}", error)
        }
    }
}
