use std::collections::VecDeque;

use sacco_gateway::auth::{ApiKeyService, JwtResolver, Role};

fn print_help() {
    eprintln!(
        "\
sacco-gateway-admin

USAGE:
  sacco-gateway-admin <command> [options]

COMMANDS:
  gen-key             Generate an API key secret with its digest
  hash-key            Digest an existing API key secret
  issue-token         Issue a JWT for development and testing

hash-key OPTIONS:
  --key <secret>      (required) The plaintext secret to digest

issue-token OPTIONS:
  --sub <id>          (required) Subject (user id)
  --role <role>       (optional) member | admin | super_admin (default: member)
  --ttl-hours <n>     (optional) Token lifetime in hours (default: 24)

ENV (issue-token):
  JWT_SECRET / JWT_ISSUER / JWT_AUDIENCE
"
    );
}

fn parse_role(value: &str) -> anyhow::Result<Role> {
    match value {
        "member" => Ok(Role::Member),
        "admin" => Ok(Role::Admin),
        "super_admin" => Ok(Role::SuperAdmin),
        other => anyhow::bail!("unknown role {other:?}"),
    }
}

fn main() -> anyhow::Result<()> {
    let mut args: VecDeque<String> = std::env::args().skip(1).collect();
    let Some(command) = args.pop_front() else {
        print_help();
        return Ok(());
    };

    if matches!(command.as_str(), "-h" | "--help" | "help") {
        print_help();
        return Ok(());
    }

    match command.as_str() {
        "gen-key" => {
            let (plaintext, digest) = ApiKeyService::generate_secret();
            println!("api_key: {plaintext}");
            println!("digest:  {digest}");
            eprintln!("Store only the digest; the secret is shown once.");
        }
        "hash-key" => {
            let mut key: Option<String> = None;
            while let Some(arg) = args.pop_front() {
                match arg.as_str() {
                    "--key" => {
                        key = Some(
                            args.pop_front()
                                .ok_or_else(|| anyhow::anyhow!("missing value for --key"))?,
                        );
                    }
                    "-h" | "--help" => {
                        print_help();
                        return Ok(());
                    }
                    other => anyhow::bail!("unknown option {other:?}"),
                }
            }
            let key = key.ok_or_else(|| anyhow::anyhow!("--key is required"))?;
            println!("{}", ApiKeyService::hash_secret(&key));
        }
        "issue-token" => {
            let mut sub: Option<String> = None;
            let mut role = Role::Member;
            let mut ttl_hours: i64 = 24;
            while let Some(arg) = args.pop_front() {
                match arg.as_str() {
                    "--sub" => {
                        sub = Some(
                            args.pop_front()
                                .ok_or_else(|| anyhow::anyhow!("missing value for --sub"))?,
                        );
                    }
                    "--role" => {
                        let value = args
                            .pop_front()
                            .ok_or_else(|| anyhow::anyhow!("missing value for --role"))?;
                        role = parse_role(&value)?;
                    }
                    "--ttl-hours" => {
                        ttl_hours = args
                            .pop_front()
                            .ok_or_else(|| anyhow::anyhow!("missing value for --ttl-hours"))?
                            .parse()?;
                    }
                    "-h" | "--help" => {
                        print_help();
                        return Ok(());
                    }
                    other => anyhow::bail!("unknown option {other:?}"),
                }
            }
            let sub = sub.ok_or_else(|| anyhow::anyhow!("--sub is required"))?;

            let secret = std::env::var("JWT_SECRET")
                .map_err(|_| anyhow::anyhow!("JWT_SECRET is required"))?;
            let issuer = std::env::var("JWT_ISSUER").unwrap_or_else(|_| "sacco-gateway".to_string());
            let audience =
                std::env::var("JWT_AUDIENCE").unwrap_or_else(|_| "sacco-api".to_string());

            let resolver = JwtResolver::new(secret.as_bytes(), &issuer, &audience);
            let token = resolver
                .issue(&sub, &[role], chrono::Duration::hours(ttl_hours))
                .map_err(|e| anyhow::anyhow!("issuing token: {e}"))?;
            println!("{token}");
        }
        other => {
            eprintln!("Unknown command: {other}");
            print_help();
            std::process::exit(2);
        }
    }

    Ok(())
}
