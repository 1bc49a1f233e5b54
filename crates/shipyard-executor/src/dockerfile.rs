//! Dockerfile rendering for classified build plans.

use shipyard_core::deployment::Framework;
use shipyard_core::plan::BuildPlan;
use url::Url;

use crate::git::shell_quote;

pub const NODE_IMAGE: &str = "node:18-alpine";
pub const PHP_IMAGE: &str = "php:8.2-cli";
pub const NGINX_IMAGE: &str = "nginx:alpine";

/// Base runtime image for a framework.
pub fn base_image(framework: Framework) -> &'static str {
    match framework {
        Framework::Laravel => PHP_IMAGE,
        Framework::Static | Framework::Vite => NGINX_IMAGE,
        _ => NODE_IMAGE,
    }
}

fn start_command(plan: &BuildPlan) -> String {
    plan.start_command
        .clone()
        .unwrap_or_else(|| "node index.js".to_string())
}

// Exec form is a JSON array.
fn exec_form(command: &str) -> String {
    let args = serde_json::Value::from(vec!["sh", "-c", command]);
    args.to_string()
}

/// Render the Dockerfile used to build a runnable image for `plan`.
pub fn render(plan: &BuildPlan) -> String {
    let port = plan.port;
    let mut lines = vec![format!("FROM {}", base_image(plan.framework))];

    match plan.framework {
        Framework::Laravel => {
            lines.push(
                "RUN apt-get update && apt-get install -y git unzip libzip-dev \
                 && docker-php-ext-install pdo pdo_mysql pdo_pgsql zip || true"
                    .to_string(),
            );
            lines.push("COPY --from=composer:2 /usr/bin/composer /usr/bin/composer".to_string());
            lines.push("WORKDIR /app".to_string());
            lines.push("COPY . .".to_string());
            if let Some(install) = &plan.install_command {
                lines.push(format!("RUN {install}"));
            }
        }
        Framework::Static | Framework::Vite => {
            lines.push("COPY . /usr/share/nginx/html".to_string());
            lines.push(format!("EXPOSE {port}"));
            return finish(lines);
        }
        _ => {
            lines.push("WORKDIR /app".to_string());
            lines.push("COPY package*.json ./".to_string());
            if let Some(install) = &plan.install_command {
                lines.push(format!("RUN {install}"));
            }
            lines.push("COPY . .".to_string());
            if let Some(generate) = &plan.orm_generate_command {
                lines.push(format!("RUN {generate}"));
            }
            if let Some(build) = &plan.build_command {
                lines.push(format!("RUN {build}"));
            }
        }
    }

    lines.push(format!("ENV PORT={port}"));
    lines.push(format!("EXPOSE {port}"));
    lines.push(format!("CMD {}", exec_form(&start_command(plan))));
    finish(lines)
}

fn finish(lines: Vec<String>) -> String {
    let mut out = lines.join("\n");
    out.push('\n');
    out
}

/// Base image and container command that clone and start the app at
/// container start, for workers without an image builder.
pub fn fallback_container(plan: &BuildPlan, git_url: &Url, branch: &str) -> (String, Vec<String>) {
    let clone = format!(
        "git clone --depth 1 --single-branch --branch {} {} /app && cd /app",
        shell_quote(branch),
        shell_quote(git_url.as_str())
    );
    let mut steps = Vec::new();
    match plan.framework {
        Framework::Laravel => {
            steps.push("apt-get update && apt-get install -y git unzip".to_string());
            steps.push(
                "curl -sS https://getcomposer.org/installer | php -- --install-dir=/usr/local/bin --filename=composer"
                    .to_string(),
            );
        }
        _ => steps.push("apk add --no-cache git".to_string()),
    }
    steps.push(clone);
    steps.extend(plan.install_command.iter().cloned());
    steps.extend(plan.orm_generate_command.iter().cloned());
    steps.extend(plan.build_command.iter().cloned());
    steps.push(start_command(plan));

    (
        base_image(plan.framework).to_string(),
        vec!["sh".to_string(), "-c".to_string(), steps.join(" && ")],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use shipyard_core::plan::{OutputLocation, SchemaSync, Strategy};

    fn node_plan(framework: Framework) -> BuildPlan {
        BuildPlan {
            framework,
            strategy: Strategy::Dynamic,
            install_command: Some("npm install".into()),
            build_command: Some("npm run build".into()),
            start_command: Some("npm start".into()),
            output: OutputLocation::FirstExisting(vec![]),
            port: 3000,
            needs_database: framework.uses_orm(),
            uses_orm: framework.uses_orm(),
            orm_generate_command: framework
                .uses_orm()
                .then(|| "npx prisma generate".to_string()),
            schema_sync: framework.uses_orm().then(|| SchemaSync::Push {
                command: "npx prisma db push".into(),
            }),
        }
    }

    #[test]
    fn test_node_dockerfile() {
        let dockerfile = render(&node_plan(Framework::NextJs));
        assert!(dockerfile.starts_with("FROM node:18-alpine\n"));
        assert!(dockerfile.contains("RUN npm install"));
        assert!(dockerfile.contains("RUN npm run build"));
        assert!(dockerfile.contains("EXPOSE 3000"));
        assert!(dockerfile.ends_with("CMD [\"sh\",\"-c\",\"npm start\"]\n"));
        assert!(!dockerfile.contains("prisma"));
    }

    #[test]
    fn test_prisma_dockerfile_generates_client() {
        let dockerfile = render(&node_plan(Framework::NodeJsPrisma));
        let generate = dockerfile.find("RUN npx prisma generate").unwrap();
        let build = dockerfile.find("RUN npm run build").unwrap();
        assert!(generate < build);
    }

    #[test]
    fn test_laravel_dockerfile() {
        let plan = BuildPlan {
            framework: Framework::Laravel,
            install_command: Some("composer install --no-dev --optimize-autoloader".into()),
            build_command: None,
            start_command: Some("php artisan serve --host=0.0.0.0 --port=80".into()),
            port: 80,
            ..node_plan(Framework::Laravel)
        };
        let dockerfile = render(&plan);
        assert!(dockerfile.starts_with("FROM php:8.2-cli"));
        assert!(dockerfile.contains("RUN composer install"));
        assert!(dockerfile.contains("php artisan serve --host=0.0.0.0 --port=80"));
    }

    #[test]
    fn test_fallback_clones_at_start() {
        let url = Url::parse("https://github.com/acme/api.git").unwrap();
        let (image, cmd) = fallback_container(&node_plan(Framework::NodeJs), &url, "main");
        assert_eq!(image, NODE_IMAGE);
        assert_eq!(&cmd[..2], &["sh", "-c"]);
        let script = &cmd[2];
        let clone = script.find("git clone").unwrap();
        let install = script.find("npm install").unwrap();
        let start = script.find("npm start").unwrap();
        assert!(clone < install && install < start);
    }

    #[test]
    fn test_exec_form_escapes_quotes() {
        assert_eq!(exec_form(r#"echo "hi""#), r#"["sh","-c","echo \"hi\""]"#);
    }
}
