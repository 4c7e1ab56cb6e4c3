use paperclip::actix::web;

use crate::handlers;

pub fn config_app(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/health").route(web::get().to(handlers::health)))
        .service(
            web::scope("/api")
                .service(web::resource("/register").route(web::post().to(handlers::register)))
                .service(web::resource("/login").route(web::post().to(handlers::login)))
                .service(web::resource("/books").route(web::get().to(handlers::list_books)))
                .service(
                    web::scope("/book")
                        .service(web::resource("").route(web::post().to(handlers::add_book)))
                        .service(
                            web::scope("/{book_id}")
                                .service(
                                    web::resource("")
                                        .route(web::get().to(handlers::get_book))
                                        .route(web::delete().to(handlers::remove_book)),
                                )
                                .service(
                                    web::resource("/page")
                                        .route(web::get().to(handlers::get_book_page)),
                                )
                                .service(
                                    web::resource("/comment")
                                        .route(web::post().to(handlers::add_comment)),
                                )
                                .service(
                                    web::resource("/review")
                                        .route(web::put().to(handlers::upsert_review)),
                                ),
                        ),
                )
                .service(
                    web::resource("/comment/{comment_id}")
                        .route(web::delete().to(handlers::delete_comment)),
                )
                .service(
                    web::resource("/review/{review_id}")
                        .route(web::delete().to(handlers::delete_review)),
                )
                .service(
                    web::scope("/request")
                        .service(web::resource("").route(web::post().to(handlers::create_request)))
                        .service(
                            web::scope("/{request_id}")
                                .service(
                                    web::resource("")
                                        .route(web::get().to(handlers::track_request)),
                                )
                                .service(
                                    web::resource("/complete")
                                        .route(web::post().to(handlers::complete_request)),
                                ),
                        ),
                )
                .service(
                    web::scope("/requests")
                        .service(
                            web::resource("/buyer")
                                .route(web::get().to(handlers::buyer_requests)),
                        )
                        .service(
                            web::resource("/seller")
                                .route(web::get().to(handlers::seller_requests)),
                        ),
                ),
        );
}
