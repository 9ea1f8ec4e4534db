use actix_web::web;

pub mod ai;
pub mod auth;
pub mod calls;
pub mod chat;
pub mod customers;
pub mod health;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(health::root)
        .service(health::health)
        .service(
            web::scope("/api")
                .service(health::api_health)
                .service(
                    web::scope("/auth")
                        .service(auth::signup)
                        .service(auth::login)
                        .service(auth::me)
                        .service(auth::logout)
                        .service(auth::employees)
                        .service(auth::update_user)
                        .service(auth::federated_sync),
                )
                .service(
                    web::scope("/ai")
                        .service(ai::chat)
                        .service(ai::diagnostics)
                        .service(ai::ping),
                )
                .service(
                    web::scope("/calls")
                        .service(calls::upload_call)
                        .service(calls::list_calls)
                        .service(calls::get_call)
                        .service(calls::get_call_audio)
                        .service(calls::update_call)
                        .service(calls::delete_call)
                        .service(calls::transcribe_call)
                        .service(calls::summarize_call),
                )
                .service(web::scope("/transcripts").service(calls::get_transcript))
                .service(web::scope("/summaries").service(calls::get_summary))
                .service(
                    web::scope("/customers")
                        .service(customers::create_customer)
                        .service(customers::list_customers)
                        .service(customers::get_customer)
                        .service(customers::update_customer)
                        .service(customers::delete_customer)
                        .service(customers::customer_calls)
                        .service(chat::chat_history)
                        .service(chat::customer_chat),
                ),
        );
}
