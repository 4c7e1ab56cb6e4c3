use std::sync::Arc;

use actix_web::http::header::LOCATION;
use actix_web::web::Data;
use actix_web::{Error, HttpRequest, HttpResponse};
use paperclip::actix::{api_v2_operation, web};

use crate::api::{
    AuthenticatedId, BookId, CommentForm, CommentId, CommentText, Credentials, ListingForm,
    ListingPage, ListingsResponse, NewListing, Quantity, Rating, RegistrationDetails, RequestForm,
    RequestId, ReviewForm, ReviewId, UserId, ValidationError,
};
use crate::auth;
use crate::exchange_repository::{ExchangeRepository, ExchangeRepositoryError};

type Repository = Data<Arc<dyn ExchangeRepository>>;

/// Maps the repository error taxonomy onto HTTP statuses. Internal failures
/// are logged and answered with an opaque 500.
fn repository_error_response(action: &str, err: ExchangeRepositoryError) -> HttpResponse {
    use ExchangeRepositoryError::*;
    match &err {
        UsernameTaken(..) | ListingHasRequests(..) => HttpResponse::Conflict().json(err.to_string()),
        InvalidCredentials => HttpResponse::Unauthorized().json(err.to_string()),
        UserNotFound(..) | BookNotFound(..) | RequestNotFound(..) | CommentNotFound(..)
        | ReviewNotFound(..) => HttpResponse::NotFound().json(err.to_string()),
        NotListingOwner(..) | NotSellerOfRequestedBook(..) | NotCommentAuthor(..)
        | NotReviewAuthor(..) | SelfPurchase(..) | SelfReview(..) => {
            HttpResponse::Forbidden().json(err.to_string())
        }
        DatabaseFailure(..) | Other(..) => {
            tracing::error!("{} failed {}", action, err);
            HttpResponse::InternalServerError().finish()
        }
    }
}

fn validation_error_response(err: ValidationError) -> HttpResponse {
    HttpResponse::BadRequest().json(err.to_string())
}

/// The session gate: actions below require an authenticated identity.
fn require_user(req: &HttpRequest) -> Result<UserId, HttpResponse> {
    auth::current_user_id(req)
        .ok_or_else(|| HttpResponse::Unauthorized().json("Authentication required"))
}

#[api_v2_operation]
pub async fn health() -> Result<HttpResponse, Error> {
    Ok(HttpResponse::Ok().finish())
}

#[api_v2_operation]
pub async fn register(
    repository: Repository,
    registration: web::Json<RegistrationDetails>,
) -> Result<HttpResponse, Error> {
    Ok(
        match repository.register_account(registration.into_inner()).await {
            Ok(user_id) => HttpResponse::Ok().json(AuthenticatedId { user_id }),
            Err(err) => repository_error_response("Register", err),
        },
    )
}

#[api_v2_operation]
pub async fn login(
    repository: Repository,
    credentials: web::Json<Credentials>,
) -> Result<HttpResponse, Error> {
    let credentials = credentials.into_inner();
    Ok(
        match repository
            .authenticate(&credentials.username, &credentials.password)
            .await
        {
            Ok(user_id) => HttpResponse::Ok().json(AuthenticatedId { user_id }),
            Err(err) => repository_error_response("Login", err),
        },
    )
}

#[api_v2_operation]
pub async fn list_books(
    req: HttpRequest,
    repository: Repository,
) -> Result<HttpResponse, Error> {
    if let Err(denied) = require_user(&req) {
        return Ok(denied);
    }
    Ok(match repository.list_listings_with_ratings().await {
        Ok(listings) => HttpResponse::Ok().json(ListingsResponse { listings }),
        Err(err) => repository_error_response("List books", err),
    })
}

#[api_v2_operation]
pub async fn add_book(
    req: HttpRequest,
    repository: Repository,
    form: web::Json<ListingForm>,
) -> Result<HttpResponse, Error> {
    let seller_id = match require_user(&req) {
        Ok(id) => id,
        Err(denied) => return Ok(denied),
    };
    let listing = match NewListing::try_from(form.into_inner()) {
        Ok(listing) => listing,
        Err(err) => return Ok(validation_error_response(err)),
    };
    Ok(match repository.add_listing(seller_id, listing).await {
        Ok(book_id) => HttpResponse::Ok()
            .append_header((LOCATION, format!("/api/book/{}", book_id)))
            .finish(),
        Err(err) => repository_error_response("Add book", err),
    })
}

#[api_v2_operation]
pub async fn get_book(
    req: HttpRequest,
    repository: Repository,
    book_id: web::Path<BookId>,
) -> Result<HttpResponse, Error> {
    if let Err(denied) = require_user(&req) {
        return Ok(denied);
    }
    Ok(match repository.get_listing(book_id.into_inner()).await {
        Ok(listing) => HttpResponse::Ok().json(listing),
        Err(err) => repository_error_response("Get book", err),
    })
}

#[api_v2_operation]
pub async fn get_book_page(
    req: HttpRequest,
    repository: Repository,
    book_id: web::Path<BookId>,
) -> Result<HttpResponse, Error> {
    let viewer_id = match require_user(&req) {
        Ok(id) => id,
        Err(denied) => return Ok(denied),
    };
    let book_id = book_id.into_inner();

    let listing = match repository.get_listing_with_ratings(book_id).await {
        Ok(listing) => listing,
        Err(err) => return Ok(repository_error_response("Get book page", err)),
    };
    let comments = match repository.list_comments(book_id).await {
        Ok(comments) => comments,
        Err(err) => return Ok(repository_error_response("Get book page", err)),
    };
    let reviews = match repository.list_reviews(book_id).await {
        Ok(reviews) => reviews,
        Err(err) => return Ok(repository_error_response("Get book page", err)),
    };
    let viewer_review = match repository.find_review(book_id, viewer_id).await {
        Ok(viewer_review) => viewer_review,
        Err(err) => return Ok(repository_error_response("Get book page", err)),
    };

    Ok(HttpResponse::Ok().json(ListingPage {
        listing,
        comments,
        reviews,
        viewer_review,
    }))
}

#[api_v2_operation]
pub async fn remove_book(
    req: HttpRequest,
    repository: Repository,
    book_id: web::Path<BookId>,
) -> Result<HttpResponse, Error> {
    let requester_id = match require_user(&req) {
        Ok(id) => id,
        Err(denied) => return Ok(denied),
    };
    Ok(
        match repository
            .remove_listing(book_id.into_inner(), requester_id)
            .await
        {
            Ok(()) => HttpResponse::Ok().finish(),
            Err(err) => repository_error_response("Remove book", err),
        },
    )
}

#[api_v2_operation]
pub async fn create_request(
    req: HttpRequest,
    repository: Repository,
    form: web::Json<RequestForm>,
) -> Result<HttpResponse, Error> {
    let buyer_id = match require_user(&req) {
        Ok(id) => id,
        Err(denied) => return Ok(denied),
    };
    let form = form.into_inner();
    let quantity = match Quantity::new(form.quantity) {
        Ok(quantity) => quantity,
        Err(err) => return Ok(validation_error_response(err)),
    };
    Ok(
        match repository
            .create_request(buyer_id, form.book_id, quantity)
            .await
        {
            Ok(request_id) => HttpResponse::Ok()
                .append_header((LOCATION, format!("/api/request/{}", request_id)))
                .finish(),
            Err(err) => repository_error_response("Create request", err),
        },
    )
}

#[api_v2_operation]
pub async fn track_request(
    req: HttpRequest,
    repository: Repository,
    request_id: web::Path<RequestId>,
) -> Result<HttpResponse, Error> {
    if let Err(denied) = require_user(&req) {
        return Ok(denied);
    }
    Ok(match repository.get_request(request_id.into_inner()).await {
        Ok(record) => HttpResponse::Ok().json(record),
        Err(err) => repository_error_response("Track request", err),
    })
}

#[api_v2_operation]
pub async fn buyer_requests(
    req: HttpRequest,
    repository: Repository,
) -> Result<HttpResponse, Error> {
    let buyer_id = match require_user(&req) {
        Ok(id) => id,
        Err(denied) => return Ok(denied),
    };
    Ok(match repository.list_requests_for_buyer(buyer_id).await {
        Ok(requests) => HttpResponse::Ok().json(requests),
        Err(err) => repository_error_response("List buyer requests", err),
    })
}

#[api_v2_operation]
pub async fn seller_requests(
    req: HttpRequest,
    repository: Repository,
) -> Result<HttpResponse, Error> {
    let seller_id = match require_user(&req) {
        Ok(id) => id,
        Err(denied) => return Ok(denied),
    };
    Ok(match repository.list_requests_for_seller(seller_id).await {
        Ok(requests) => HttpResponse::Ok().json(requests),
        Err(err) => repository_error_response("List seller requests", err),
    })
}

#[api_v2_operation]
pub async fn complete_request(
    req: HttpRequest,
    repository: Repository,
    request_id: web::Path<RequestId>,
) -> Result<HttpResponse, Error> {
    let requester_id = match require_user(&req) {
        Ok(id) => id,
        Err(denied) => return Ok(denied),
    };
    Ok(
        match repository
            .complete_request(request_id.into_inner(), requester_id)
            .await
        {
            Ok(()) => HttpResponse::Ok().finish(),
            Err(err) => repository_error_response("Complete request", err),
        },
    )
}

#[api_v2_operation]
pub async fn add_comment(
    req: HttpRequest,
    repository: Repository,
    book_id: web::Path<BookId>,
    form: web::Json<CommentForm>,
) -> Result<HttpResponse, Error> {
    let author_id = match require_user(&req) {
        Ok(id) => id,
        Err(denied) => return Ok(denied),
    };
    let content = match CommentText::new(&form.into_inner().content) {
        Ok(content) => content,
        Err(err) => return Ok(validation_error_response(err)),
    };
    Ok(
        match repository
            .add_comment(book_id.into_inner(), author_id, content)
            .await
        {
            Ok(comment_id) => HttpResponse::Ok().json(comment_id),
            Err(err) => repository_error_response("Add comment", err),
        },
    )
}

#[api_v2_operation]
pub async fn delete_comment(
    req: HttpRequest,
    repository: Repository,
    comment_id: web::Path<CommentId>,
) -> Result<HttpResponse, Error> {
    let requester_id = match require_user(&req) {
        Ok(id) => id,
        Err(denied) => return Ok(denied),
    };
    Ok(
        match repository
            .delete_comment(comment_id.into_inner(), requester_id)
            .await
        {
            Ok(()) => HttpResponse::Ok().finish(),
            Err(err) => repository_error_response("Delete comment", err),
        },
    )
}

#[api_v2_operation]
pub async fn upsert_review(
    req: HttpRequest,
    repository: Repository,
    book_id: web::Path<BookId>,
    form: web::Json<ReviewForm>,
) -> Result<HttpResponse, Error> {
    let author_id = match require_user(&req) {
        Ok(id) => id,
        Err(denied) => return Ok(denied),
    };
    let form = form.into_inner();
    let rating = match Rating::new(form.rating) {
        Ok(rating) => rating,
        Err(err) => return Ok(validation_error_response(err)),
    };
    Ok(
        match repository
            .upsert_review(book_id.into_inner(), author_id, rating, form.content)
            .await
        {
            Ok(review_id) => HttpResponse::Ok().json(review_id),
            Err(err) => repository_error_response("Upsert review", err),
        },
    )
}

#[api_v2_operation]
pub async fn delete_review(
    req: HttpRequest,
    repository: Repository,
    review_id: web::Path<ReviewId>,
) -> Result<HttpResponse, Error> {
    let requester_id = match require_user(&req) {
        Ok(id) => id,
        Err(denied) => return Ok(denied),
    };
    Ok(
        match repository
            .delete_review(review_id.into_inner(), requester_id)
            .await
        {
            Ok(()) => HttpResponse::Ok().finish(),
            Err(err) => repository_error_response("Delete review", err),
        },
    )
}

#[cfg(test)]
mod handler_tests {
    use actix_http::Request;
    use actix_web::body::MessageBody;
    use actix_web::dev::{Service, ServiceResponse};
    use actix_web::http::StatusCode;
    use actix_web::{test, App};
    use paperclip::actix::OpenApiExt;

    use crate::api::{ListingPage, RequestRecord, RequestStatus};
    use crate::app_config::config_app;
    use crate::auth::USER_ID_HEADER;
    use crate::exchange_repository::InMemoryExchangeRepository;

    use super::*;

    async fn test_app(
    ) -> impl Service<Request, Response = ServiceResponse<impl MessageBody>, Error = actix_web::Error>
    {
        let repository: Arc<dyn ExchangeRepository> =
            Arc::new(InMemoryExchangeRepository::default());
        test::init_service(
            App::new()
                .wrap_api()
                .app_data(Data::new(repository))
                .configure(config_app)
                .build(),
        )
        .await
    }

    async fn register_user<S, B>(app: &S, username: &str) -> UserId
    where
        S: Service<Request, Response = ServiceResponse<B>, Error = actix_web::Error>,
        B: MessageBody,
    {
        let req = test::TestRequest::post()
            .uri("/api/register")
            .set_json(RegistrationDetails {
                username: username.to_string(),
                password: format!("{username}-password"),
                email: format!("{username}@campus.example"),
            })
            .to_request();
        let resp = test::call_service(app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: AuthenticatedId = test::read_body_json(resp).await;
        body.user_id
    }

    async fn add_book_for<S, B>(app: &S, seller_id: UserId, name: &str, price: f64) -> BookId
    where
        S: Service<Request, Response = ServiceResponse<B>, Error = actix_web::Error>,
        B: MessageBody,
    {
        let req = test::TestRequest::post()
            .uri("/api/book")
            .insert_header((USER_ID_HEADER, seller_id.to_string()))
            .set_json(ListingForm {
                name: name.to_string(),
                description: "Good condition".to_string(),
                price,
                semester: "Semester 1".to_string(),
                image_url: "https://img.example/book.png".to_string(),
            })
            .to_request();
        let resp = test::call_service(app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        resp.headers()
            .get(LOCATION)
            .expect("No location header")
            .to_str()
            .unwrap()
            .strip_prefix("/api/book/")
            .expect("Invalid location header")
            .parse()
            .unwrap()
    }

    #[tokio::test]
    /// The end-to-end marketplace scenario:
    /// seller A lists Book X at 100, buyer B requests quantity 2, the
    /// request carries the frozen total 200 and status Requested, A
    /// completes it, and B's attempt to complete is rejected with 403.
    async fn test_request_scenario_end_to_end() {
        let app = test_app().await;

        let seller_id = register_user(&app, "seller_a").await;
        let buyer_id = register_user(&app, "buyer_b").await;
        let book_id = add_book_for(&app, seller_id, "Book X", 100.0).await;

        let req = test::TestRequest::post()
            .uri("/api/request")
            .insert_header((USER_ID_HEADER, buyer_id.to_string()))
            .set_json(RequestForm {
                book_id,
                quantity: 2,
            })
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let request_id: RequestId = resp
            .headers()
            .get(LOCATION)
            .expect("No location header")
            .to_str()
            .unwrap()
            .strip_prefix("/api/request/")
            .expect("Invalid location header")
            .parse()
            .unwrap();

        let req = test::TestRequest::get()
            .uri(&format!("/api/request/{}", request_id))
            .insert_header((USER_ID_HEADER, buyer_id.to_string()))
            .to_request();
        let record: RequestRecord = test::read_body_json(test::call_service(&app, req).await).await;
        assert_eq!(record.total, 200.0);
        assert_eq!(record.status, RequestStatus::Requested);

        // buyer cannot complete their own request
        let req = test::TestRequest::post()
            .uri(&format!("/api/request/{}/complete", request_id))
            .insert_header((USER_ID_HEADER, buyer_id.to_string()))
            .to_request();
        assert_eq!(
            test::call_service(&app, req).await.status(),
            StatusCode::FORBIDDEN
        );

        let req = test::TestRequest::post()
            .uri(&format!("/api/request/{}/complete", request_id))
            .insert_header((USER_ID_HEADER, seller_id.to_string()))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);

        let req = test::TestRequest::get()
            .uri(&format!("/api/request/{}", request_id))
            .insert_header((USER_ID_HEADER, seller_id.to_string()))
            .to_request();
        let record: RequestRecord = test::read_body_json(test::call_service(&app, req).await).await;
        assert_eq!(record.status, RequestStatus::Completed);

        let req = test::TestRequest::post()
            .uri(&format!("/api/request/{}/complete", request_id))
            .insert_header((USER_ID_HEADER, buyer_id.to_string()))
            .to_request();
        assert_eq!(
            test::call_service(&app, req).await.status(),
            StatusCode::FORBIDDEN
        );
    }

    #[tokio::test]
    /// Every action behind the session gate answers 401 without the
    /// identity header, and register/login stay open.
    async fn test_authentication_gate() {
        let app = test_app().await;
        register_user(&app, "gate_user").await;

        let gated = [
            test::TestRequest::get().uri("/api/books"),
            test::TestRequest::get().uri("/api/requests/buyer"),
            test::TestRequest::get().uri("/api/requests/seller"),
            test::TestRequest::get().uri("/api/book/0"),
        ];
        for request in gated {
            let resp = test::call_service(&app, request.to_request()).await;
            assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        }

        let resp = test::call_service(
            &app,
            test::TestRequest::post()
                .uri("/api/login")
                .set_json(Credentials {
                    username: "gate_user".to_string(),
                    password: "gate_user-password".to_string(),
                })
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = test::call_service(
            &app,
            test::TestRequest::post()
                .uri("/api/login")
                .set_json(Credentials {
                    username: "gate_user".to_string(),
                    password: "wrong".to_string(),
                })
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let resp = test::call_service(
            &app,
            test::TestRequest::post()
                .uri("/api/register")
                .set_json(RegistrationDetails {
                    username: "gate_user".to_string(),
                    password: "other".to_string(),
                    email: "dup@campus.example".to_string(),
                })
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    /// Malformed input is rejected at the boundary with 400 before the
    /// repository is touched.
    async fn test_boundary_validation() {
        let app = test_app().await;
        let user_id = register_user(&app, "validator").await;
        let book_id = add_book_for(&app, user_id, "Valid Book", 50.0).await;
        let reviewer_id = register_user(&app, "reviewer").await;

        let resp = test::call_service(
            &app,
            test::TestRequest::post()
                .uri("/api/book")
                .insert_header((USER_ID_HEADER, user_id.to_string()))
                .set_json(ListingForm {
                    name: "Bad".to_string(),
                    description: "".to_string(),
                    price: -10.0,
                    semester: "Semester 1".to_string(),
                    image_url: "".to_string(),
                })
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = test::call_service(
            &app,
            test::TestRequest::post()
                .uri("/api/request")
                .insert_header((USER_ID_HEADER, reviewer_id.to_string()))
                .set_json(RequestForm {
                    book_id,
                    quantity: 0,
                })
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = test::call_service(
            &app,
            test::TestRequest::post()
                .uri(&format!("/api/book/{}/comment", book_id))
                .insert_header((USER_ID_HEADER, reviewer_id.to_string()))
                .set_json(CommentForm {
                    content: "   ".to_string(),
                })
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = test::call_service(
            &app,
            test::TestRequest::put()
                .uri(&format!("/api/book/{}/review", book_id))
                .insert_header((USER_ID_HEADER, reviewer_id.to_string()))
                .set_json(ReviewForm {
                    rating: 6,
                    content: "over the top".to_string(),
                })
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    /// The book page aggregates seller, ratings, comments and the
    /// viewer's own review; unknown books answer 404.
    async fn test_book_page_and_aggregates() {
        let app = test_app().await;

        let seller_id = register_user(&app, "page_seller").await;
        let reviewer_id = register_user(&app, "page_reviewer").await;
        let book_id = add_book_for(&app, seller_id, "Reviewed Book", 75.0).await;

        let resp = test::call_service(
            &app,
            test::TestRequest::post()
                .uri(&format!("/api/book/{}/comment", book_id))
                .insert_header((USER_ID_HEADER, reviewer_id.to_string()))
                .set_json(CommentForm {
                    content: "is this the 3rd edition?".to_string(),
                })
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = test::call_service(
            &app,
            test::TestRequest::put()
                .uri(&format!("/api/book/{}/review", book_id))
                .insert_header((USER_ID_HEADER, reviewer_id.to_string()))
                .set_json(ReviewForm {
                    rating: 4,
                    content: "held up well".to_string(),
                })
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);

        // the seller reviewing their own book is forbidden
        let resp = test::call_service(
            &app,
            test::TestRequest::put()
                .uri(&format!("/api/book/{}/review", book_id))
                .insert_header((USER_ID_HEADER, seller_id.to_string()))
                .set_json(ReviewForm {
                    rating: 5,
                    content: "pristine".to_string(),
                })
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);

        let req = test::TestRequest::get()
            .uri(&format!("/api/book/{}/page", book_id))
            .insert_header((USER_ID_HEADER, reviewer_id.to_string()))
            .to_request();
        let page: ListingPage = test::read_body_json(test::call_service(&app, req).await).await;
        assert_eq!(page.listing.seller_username, "page_seller");
        assert_eq!(page.listing.avg_rating, 4.0);
        assert_eq!(page.listing.review_count, 1);
        assert_eq!(page.comments.len(), 1);
        assert_eq!(page.reviews.len(), 1);
        assert_eq!(page.viewer_review.as_ref().map(|review| review.rating), Some(4));

        let resp = test::call_service(
            &app,
            test::TestRequest::get()
                .uri("/api/book/9999/page")
                .insert_header((USER_ID_HEADER, reviewer_id.to_string()))
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
