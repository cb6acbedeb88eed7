pub mod agents;
pub mod client;
pub mod config;
pub mod error;
pub mod mail;
pub mod models;
pub mod queue;
pub mod review;
pub mod routes;
pub mod runtime;
pub mod store;
mod sweeps;

use std::sync::Arc;

use rocket::fairing::AdHoc;
use rocket_cors::CorsOptions;

use agents::AgentRegistry;
use config::Config;
use error::Result;
use mail::MailService;
use review::{ReviewMsg, ReviewService};
use runtime::{ActorRef, ActorSystem, ServiceKey, ServiceRegistry};
use store::Store;

pub const AGENT_SERVICE: ServiceKey<AgentRegistry> = ServiceKey::new("agents");
pub const MAIL_SERVICE: ServiceKey<MailService> = ServiceKey::new("mail");
pub const REVIEW_SERVICE: ServiceKey<ReviewService> = ServiceKey::new("reviews");

/// Managed state handed to every route: the service registry plus direct
/// store access for read-only surfaces.
pub struct Services {
    pub registry: Arc<ServiceRegistry>,
    pub system: Arc<ActorSystem>,
    pub store: Arc<Store>,
    pub config: Config,
}

impl Services {
    pub fn agents(&self) -> Result<ActorRef<AgentRegistry>> {
        self.registry.lookup(AGENT_SERVICE)
    }

    pub fn mail(&self) -> Result<ActorRef<MailService>> {
        self.registry.lookup(MAIL_SERVICE)
    }

    pub fn reviews(&self) -> Result<ActorRef<ReviewService>> {
        self.registry.lookup(REVIEW_SERVICE)
    }
}

pub fn rocket() -> rocket::Rocket<rocket::Build> {
    rocket_with_config(Config::from_env())
}

pub fn rocket_with_config(config: Config) -> rocket::Rocket<rocket::Build> {
    prepare_data_dirs(&config);

    let cors = CorsOptions::default()
        .to_cors()
        .expect("Failed to create CORS");

    rocket::build()
        .attach(cors)
        .register("/", rocket::catchers![routes::not_found])
        .mount(
            "/",
            rocket::routes![
                routes::send_message,
                routes::fetch_inbox,
                routes::fetch_message,
                routes::fetch_thread,
                routes::transition_message,
                routes::acknowledge_message,
                routes::poll_messages,
                routes::create_topic,
                routes::subscribe,
                routes::unsubscribe,
                routes::publish,
                routes::list_subscribers,
                routes::ensure_identity,
                routes::list_agents,
                routes::get_agent,
                routes::heartbeat,
                routes::agent_status,
                routes::start_session,
                routes::complete_session,
                routes::create_review,
                routes::list_reviews,
                routes::get_review,
                routes::resubmit_review,
                routes::cancel_review,
                routes::list_review_issues,
                routes::update_issue_status,
                routes::list_activity,
                routes::health,
                routes::version,
            ],
        )
        .attach(AdHoc::on_ignite("Actor System", move |rocket| {
            Box::pin(async move {
                // Startup order is dependency order: store, then agent
                // registry, mail, review. Teardown walks it in reverse.
                let store = Arc::new(
                    Store::open(&config.db_path()).expect("Failed to open courier store"),
                );
                let system = Arc::new(ActorSystem::new());
                let registry = Arc::new(ServiceRegistry::new());

                let agents_ref =
                    system.spawn(AgentRegistry::new(store.clone(), config.identities_dir()), 256);
                let mail_ref = system.spawn(
                    MailService::new(
                        store.clone(),
                        config.hub_max_subscribers,
                        config.retention_days_trash,
                    ),
                    1024,
                );
                let review_ref = system.spawn(
                    ReviewService::new(store.clone(), mail_ref.clone(), config.clone()),
                    256,
                );
                // Workers signal completion through the actor's own ref.
                let _ = review_ref.tell(ReviewMsg::Init {
                    self_ref: review_ref.clone(),
                });

                registry.register(AGENT_SERVICE, agents_ref);
                registry.register(MAIL_SERVICE, mail_ref);
                registry.register(REVIEW_SERVICE, review_ref);

                rocket.manage(Services {
                    registry,
                    system,
                    store,
                    config,
                })
            })
        }))
        .attach(AdHoc::on_liftoff("Background Sweeps", |rocket| {
            Box::pin(async move {
                let services = rocket.state::<Services>().expect("services state");
                if let Ok(mail) = services.mail() {
                    sweeps::spawn_snooze_sweep(mail.clone(), services.config.snooze_sweep_interval);
                    sweeps::spawn_deadline_sweep(mail.clone());
                    sweeps::spawn_trash_purge(mail);
                    println!("🧹 Background sweeps started");
                }
                println!(
                    "📫 agent-courier data dir: {}",
                    services.config.data_dir.display()
                );
            })
        }))
        .attach(AdHoc::on_shutdown("Actor Teardown", |rocket| {
            Box::pin(async move {
                if let Some(services) = rocket.state::<Services>() {
                    services.system.shutdown();
                    services.registry.teardown();
                }
            })
        }))
}

/// Data directory layout: database, identity records, logs, reviewer
/// scratch homes. Everything owner-only.
fn prepare_data_dirs(config: &Config) {
    for dir in [
        config.data_dir.clone(),
        config.identities_dir(),
        config.logs_dir(),
        config.review_home_dir(),
    ] {
        if std::fs::create_dir_all(&dir).is_ok() {
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                let _ = std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o700));
            }
        }
    }
}
