use clap::{Arg, ArgAction, ArgMatches, Command}; // Builder-style command-line parsing
use serde::Serialize;
use serde_json::json;
use std::error::Error;
use std::process;
use std::sync::Arc;

use tokenwarden::auth::{
    handle_auth_error, AuthError, AuthService, Guard, LoginRequest, MemoryStore, MessageResponse,
    RegisterRequest, RequestCredentials, RouteAccess,
};
use tokenwarden::config::AuthConfig;
use tokenwarden::email::Mailer;
use tokenwarden::utils::io::prompt_password;
use tokenwarden::utils::logging::initialize_logging;
use tokenwarden::utils::time::{Clock, SystemClock};

/// Everything a subcommand needs, wired once from configuration
struct App {
    service: Arc<AuthService>,
    guard: Guard,
}

impl App {
    async fn build(config: &AuthConfig) -> Result<Self, Box<dyn Error>> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let store = Arc::new(MemoryStore::open(&config.store_path, clock.clone()).await?);
        let mailer = Arc::new(Mailer::from_config(config)?);
        let service = Arc::new(AuthService::new(config, store.clone(), store, mailer, clock));
        Ok(Self {
            guard: Guard::new(service.clone()),
            service,
        })
    }
}

fn email_arg() -> Arg {
    Arg::new("email")
        .long("email")
        .help("Account email address")
        .required(true)
}

fn access_token_arg() -> Arg {
    Arg::new("access-token")
        .long("access-token")
        .help("Access token issued by login or refresh")
        .required(true)
}

fn password_arg(name: &'static str, help: &'static str) -> Arg {
    Arg::new(name)
        .long(name)
        .help(help)
        .value_name("PASSWORD")
}

fn cli() -> Command {
    Command::new("tokenwarden")
        .about("Credential and session lifecycle management")
        .subcommand_required(true)
        .subcommand(
            Command::new("register")
                .about("Create an account and send a verification email")
                .arg(email_arg())
                .arg(Arg::new("name").long("name").help("Display name").required(true))
                .arg(password_arg("password", "Password (prompted when omitted)")),
        )
        .subcommand(
            Command::new("login")
                .about("Sign in and receive an access and refresh token")
                .arg(email_arg())
                .arg(password_arg("password", "Password (prompted when omitted)")),
        )
        .subcommand(
            Command::new("refresh")
                .about("Rotate a refresh token")
                .arg(Arg::new("token").help("Refresh token").required(true)),
        )
        .subcommand(
            Command::new("verify-email")
                .about("Confirm an email address")
                .arg(Arg::new("token").help("Verification token from the email").required(true)),
        )
        .subcommand(
            Command::new("resend-verification")
                .about("Send a fresh verification email")
                .arg(email_arg()),
        )
        .subcommand(
            Command::new("forgot-password")
                .about("Send a password reset email")
                .arg(email_arg()),
        )
        .subcommand(
            Command::new("reset-password")
                .about("Set a new password with a reset token")
                .arg(Arg::new("token").help("Reset token from the email").required(true))
                .arg(password_arg("password", "New password (prompted when omitted)")),
        )
        .subcommand(
            Command::new("change-password")
                .about("Change the password of the signed-in user")
                .arg(access_token_arg())
                .arg(password_arg("current", "Current password (prompted when omitted)"))
                .arg(password_arg("new", "New password (prompted when omitted)")),
        )
        .subcommand(
            Command::new("logout")
                .about("Revoke a refresh token")
                .arg(Arg::new("token").help("Refresh token").required(true)),
        )
        .subcommand(
            Command::new("whoami")
                .about("Show the identity behind an access token")
                .arg(access_token_arg())
                .arg(
                    Arg::new("require-verified")
                        .long("require-verified")
                        .help("Fail unless the email address is verified")
                        .action(ArgAction::SetTrue),
                ),
        )
}

/// Take a password from the command line or prompt for it without echo
fn password_from(matches: &ArgMatches, name: &str, prompt: &str) -> Result<String, Box<dyn Error>> {
    match matches.get_one::<String>(name) {
        Some(password) => Ok(password.clone()),
        None => Ok(prompt_password(prompt)?),
    }
}

fn required<'a>(matches: &'a ArgMatches, name: &str) -> Result<&'a str, Box<dyn Error>> {
    matches
        .get_one::<String>(name)
        .map(String::as_str)
        .ok_or_else(|| format!("missing argument: {}", name).into())
}

fn to_json<T: Serialize>(value: &T) -> Result<String, Box<dyn Error>> {
    Ok(serde_json::to_string_pretty(value)?)
}

/// Collapse an auth failure into the rejection the caller sees
fn rejected<'a>(context: &'static str, email: Option<&'a str>) -> impl FnOnce(AuthError) -> Box<dyn Error> + 'a {
    move |err: AuthError| -> Box<dyn Error> { Box::new(handle_auth_error(context, email, &err)) }
}

async fn run(app: &App, matches: &ArgMatches) -> Result<String, Box<dyn Error>> {
    match matches.subcommand() {
        Some(("register", sub)) => {
            let email = required(sub, "email")?;
            let request = RegisterRequest {
                email: email.to_string(),
                name: required(sub, "name")?.to_string(),
                password: password_from(sub, "password", "Password: ")?,
            };
            let response = app
                .service
                .register(request)
                .await
                .map_err(rejected("register", Some(email)))?;
            to_json(&response)
        }
        Some(("login", sub)) => {
            let email = required(sub, "email")?;
            let request = LoginRequest {
                email: email.to_string(),
                password: password_from(sub, "password", "Password: ")?,
            };
            let response = app
                .service
                .login(request)
                .await
                .map_err(rejected("login", Some(email)))?;
            to_json(&response)
        }
        Some(("refresh", sub)) => {
            let token = required(sub, "token")?;
            let credentials = RequestCredentials {
                authorization: None,
                refresh_token: Some(token),
            };
            app.guard
                .authorize(RouteAccess::RefreshOwnerVerified, &credentials)
                .await
                .map_err(rejected("refresh", None))?;
            let pair = app
                .service
                .refresh_token(token)
                .await
                .map_err(rejected("refresh", None))?;
            to_json(&pair)
        }
        Some(("verify-email", sub)) => {
            let profile = app
                .service
                .verify_email(required(sub, "token")?)
                .await
                .map_err(rejected("verify_email", None))?;
            to_json(&json!({ "message": "Email verified successfully", "user": profile }))
        }
        Some(("resend-verification", sub)) => {
            let email = required(sub, "email")?;
            let sent = app
                .service
                .resend_verification_email(email)
                .await
                .map_err(rejected("resend_verification", Some(email)))?;
            to_json(&json!({ "message": "Verification email resent", "emailSent": sent }))
        }
        Some(("forgot-password", sub)) => {
            let email = required(sub, "email")?;
            let sent = app
                .service
                .forgot_password(email)
                .await
                .map_err(rejected("forgot_password", Some(email)))?;
            to_json(&json!({ "message": "Password reset email sent", "emailSent": sent }))
        }
        Some(("reset-password", sub)) => {
            let token = required(sub, "token")?;
            let password = password_from(sub, "password", "New password: ")?;
            app.service
                .reset_password(token, &password)
                .await
                .map_err(rejected("reset_password", None))?;
            to_json(&MessageResponse::new("Password reset successfully"))
        }
        Some(("change-password", sub)) => {
            let header = format!("Bearer {}", required(sub, "access-token")?);
            let credentials = RequestCredentials {
                authorization: Some(&header),
                refresh_token: None,
            };
            let identity = app
                .guard
                .authorize(RouteAccess::VerifiedEmail, &credentials)
                .await
                .map_err(rejected("change_password", None))?
                .ok_or("change-password requires an identity")?;
            let current = password_from(sub, "current", "Current password: ")?;
            let new = password_from(sub, "new", "New password: ")?;
            app.service
                .change_password(identity.user_id, &current, &new)
                .await
                .map_err(rejected("change_password", Some(identity.email.as_str())))?;
            to_json(&MessageResponse::new("Password changed successfully"))
        }
        Some(("logout", sub)) => {
            app.service
                .logout(required(sub, "token")?)
                .await
                .map_err(rejected("logout", None))?;
            to_json(&MessageResponse::new("Logged out successfully"))
        }
        Some(("whoami", sub)) => {
            let header = format!("Bearer {}", required(sub, "access-token")?);
            let access = if sub.get_flag("require-verified") {
                RouteAccess::VerifiedEmail
            } else {
                RouteAccess::Authenticated
            };
            let credentials = RequestCredentials {
                authorization: Some(&header),
                refresh_token: None,
            };
            let identity = app
                .guard
                .authorize(access, &credentials)
                .await
                .map_err(rejected("whoami", None))?;
            to_json(&identity)
        }
        _ => Err("unknown command".into()),
    }
}

#[tokio::main]
async fn main() {
    let matches = cli().get_matches();

    let config = match AuthConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            process::exit(1);
        }
    };

    if let Err(e) = initialize_logging(config.log_file.as_deref()) {
        eprintln!("Failed to initialize logging: {}", e);
    }

    let app = match App::build(&config).await {
        Ok(app) => app,
        Err(e) => {
            log::error!("startup failed: {}", e);
            eprintln!("Startup error: {}", e);
            process::exit(1);
        }
    };

    match run(&app, &matches).await {
        Ok(output) => println!("{}", output),
        Err(e) => {
            eprintln!("{}", e);
            process::exit(1);
        }
    }
}
