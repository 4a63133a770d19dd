//! Shell scripts run by the build projects
//!
//! Three projects run generated scripts:
//! - the image builder, which resolves the branch, maps it to a deployment
//!   tag and pushes the image
//! - the delivery pipeline's build stage, which writes `imagedefinitions.json`
//! - the meta-pipeline's synth stage, which regenerates the cloud assembly

use crate::buildspec::{Artifacts, BuildSpec, Phase, Phases};
use crate::domain::branch::BranchMapping;
use crate::domain::manifest::IMAGE_DEFINITIONS_FILE;

/// Variable holding the deployment tag resolved from the branch
pub const ENV_TAG_VAR: &str = "ENV_TAG";

/// Quote a string for bash so it is passed through literally
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Commands that set `BRANCH` to the branch being built
///
/// Webhook builds usually check out a symbolic ref. When CodeBuild leaves HEAD
/// detached the symbolic lookup fails, so fall back to the first remote branch
/// whose history contains HEAD.
pub fn resolve_branch_commands() -> Vec<String> {
    vec![
        "BRANCH=$(git symbolic-ref HEAD --short 2>/dev/null || true)".to_string(),
        concat!(
            r#"if [ -z "$BRANCH" ]; then "#,
            r#"BRANCH=$(git branch -a --contains HEAD | sed -n 2p | awk '{ printf $1 }' | sed 's|remotes/origin/||'); "#,
            "fi"
        )
        .to_string(),
        r#"echo "Building branch $BRANCH""#.to_string(),
    ]
}

/// Commands that set `ENV_TAG` from the branch mapping
///
/// Each rule is tested in declaration order and a match overwrites the
/// variable, so the last matching rule wins. No match leaves it unset.
pub fn resolve_tag_commands(mapping: &BranchMapping) -> Vec<String> {
    let mut commands = vec![format!("unset {}", ENV_TAG_VAR)];

    for rule in mapping.rules() {
        commands.push(format!(
            r#"PATTERN={}; if [[ "$BRANCH" =~ $PATTERN ]]; then {}={}; fi"#,
            shell_quote(rule.pattern()),
            ENV_TAG_VAR,
            shell_quote(rule.tag())
        ));
    }

    commands.push(format!(
        r#"echo "Environment tag: ${{{}:-<none>}}""#,
        ENV_TAG_VAR
    ));
    commands
}

/// Buildspec for the image builder project
///
/// Expects `IMAGE_NAME` and `REPOSITORY_URI` in the project environment. The
/// image is always tagged with the resolved commit and the build number; the
/// environment tag is only applied and pushed when the branch matched a rule.
pub fn image_builder(mapping: &BranchMapping) -> BuildSpec {
    let mut pre_build = vec![
        "echo Logging in to the registry".to_string(),
        r#"aws ecr get-login-password --region "$AWS_DEFAULT_REGION" | docker login --username AWS --password-stdin "${REPOSITORY_URI%%/*}""#.to_string(),
    ];
    pre_build.extend(resolve_branch_commands());
    pre_build.extend(resolve_tag_commands(mapping));

    let env_tag_guard = format!(r#"if [ -n "${{{}:-}}" ]; then"#, ENV_TAG_VAR);

    let build = vec![
        r#"docker build -t "$IMAGE_NAME:latest" ."#.to_string(),
        r#"docker tag "$IMAGE_NAME:latest" "$REPOSITORY_URI:$CODEBUILD_RESOLVED_SOURCE_VERSION""#
            .to_string(),
        r#"docker tag "$IMAGE_NAME:latest" "$REPOSITORY_URI:$CODEBUILD_BUILD_NUMBER""#.to_string(),
        format!(
            r#"{} docker tag "$IMAGE_NAME:latest" "$REPOSITORY_URI:${}"; else echo "No branch rule matched $BRANCH, skipping environment tag"; fi"#,
            env_tag_guard, ENV_TAG_VAR
        ),
    ];

    let post_build = vec![
        r#"docker push "$REPOSITORY_URI:$CODEBUILD_RESOLVED_SOURCE_VERSION""#.to_string(),
        r#"docker push "$REPOSITORY_URI:$CODEBUILD_BUILD_NUMBER""#.to_string(),
        format!(
            r#"{} docker push "$REPOSITORY_URI:${}"; fi"#,
            env_tag_guard, ENV_TAG_VAR
        ),
    ];

    BuildSpec::new(Phases {
        install: None,
        pre_build: Some(Phase::new(pre_build)),
        build: Some(Phase::new(build)),
        post_build: Some(Phase::new(post_build)),
    })
    .with_bash()
}

/// printf format producing the image definitions array
pub const IMAGE_DEFINITIONS_FORMAT: &str = r#"[{"name":"%s","imageUri":"%s"}]"#;

/// Buildspec for the delivery pipeline's build stage
///
/// Writes a single-entry `imagedefinitions.json` naming the container and
/// `$REPOSITORY_URI:$IMAGE_TAG`.
pub fn image_definitions(container: &str, tag: &str) -> BuildSpec {
    BuildSpec::new(Phases {
        build: Some(Phase::new([
            format!(
                r#"printf {} "$CONTAINER_NAME" "$REPOSITORY_URI:$IMAGE_TAG" > {}"#,
                shell_quote(IMAGE_DEFINITIONS_FORMAT),
                IMAGE_DEFINITIONS_FILE
            ),
            format!("cat {}", IMAGE_DEFINITIONS_FILE),
        ])),
        ..Default::default()
    })
    .with_variable("CONTAINER_NAME", container)
    .with_variable("IMAGE_TAG", tag)
    .with_artifacts(Artifacts {
        files: vec![IMAGE_DEFINITIONS_FILE.to_string()],
        base_directory: None,
    })
}

/// Buildspec for the meta-pipeline's synth stage
pub fn synth(out_dir: &str) -> BuildSpec {
    BuildSpec::new(Phases {
        install: Some(Phase::new([
            "curl --proto '=https' --tlsv1.2 -sSf https://sh.rustup.rs | sh -s -- -y --profile minimal",
            r#". "$HOME/.cargo/env""#,
            "cargo install --locked --path dockyard-cli",
        ])),
        build: Some(Phase::new([format!("dockyard synth --out {}", out_dir)])),
        ..Default::default()
    })
    .with_bash()
    .with_artifacts(Artifacts {
        files: vec!["**/*".to_string()],
        base_directory: Some(out_dir.to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::manifest::ImageManifest;

    fn mapping() -> BranchMapping {
        BranchMapping::new()
            .with_rule("^master$", "prod")
            .unwrap()
            .with_rule("^develop$", "dev")
            .unwrap()
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("^master$"), "'^master$'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }

    #[test]
    fn test_tag_commands_follow_rule_order() {
        let commands = resolve_tag_commands(&mapping());

        assert_eq!(commands[0], "unset ENV_TAG");
        assert_eq!(
            commands[1],
            r#"PATTERN='^master$'; if [[ "$BRANCH" =~ $PATTERN ]]; then ENV_TAG='prod'; fi"#
        );
        assert_eq!(
            commands[2],
            r#"PATTERN='^develop$'; if [[ "$BRANCH" =~ $PATTERN ]]; then ENV_TAG='dev'; fi"#
        );
    }

    /// Runs the tag commands under bash with `BRANCH` set and reports `ENV_TAG`
    #[cfg(unix)]
    fn tag_for_branch(mapping: &BranchMapping, branch: &str) -> String {
        let script = format!(
            "BRANCH={}\n{}\necho \"RESULT=${{ENV_TAG:-unset}}\"",
            shell_quote(branch),
            resolve_tag_commands(mapping).join("\n")
        );
        let output = std::process::Command::new("bash")
            .arg("-c")
            .arg(&script)
            .output()
            .unwrap();
        assert!(output.status.success());

        String::from_utf8(output.stdout)
            .unwrap()
            .lines()
            .find_map(|line| line.strip_prefix("RESULT="))
            .unwrap()
            .to_string()
    }

    #[cfg(unix)]
    #[test]
    fn test_tag_commands_under_bash() {
        let overlapping = mapping()
            .with_rule("^release/", "staging")
            .unwrap()
            .with_rule("^release/hotfix", "prod")
            .unwrap();

        for branch in ["master", "develop", "release/1.2", "release/hotfix-7", "feature/x"] {
            let expected = overlapping.resolve(branch).unwrap_or("unset");
            assert_eq!(tag_for_branch(&overlapping, branch), expected, "{}", branch);
        }

        assert_eq!(tag_for_branch(&overlapping, "master"), "prod");
        assert_eq!(tag_for_branch(&overlapping, "release/hotfix-7"), "prod");
        assert_eq!(tag_for_branch(&overlapping, "release/1.2"), "staging");
        assert_eq!(tag_for_branch(&overlapping, "feature/x"), "unset");
    }

    #[test]
    fn test_branch_fallback_for_detached_head() {
        let commands = resolve_branch_commands();
        assert!(commands[0].contains("git symbolic-ref HEAD --short"));
        assert!(commands[1].starts_with(r#"if [ -z "$BRANCH" ]"#));
        assert!(commands[1].contains("git branch -a --contains HEAD"));
        assert!(commands[1].contains("remotes/origin/"));
    }

    #[test]
    fn test_image_builder_tags_and_pushes() {
        let spec = image_builder(&mapping());
        let commands: Vec<&str> = spec.commands().collect();

        let pushes: Vec<&&str> = commands
            .iter()
            .filter(|c| c.contains("docker push"))
            .collect();
        assert_eq!(pushes.len(), 3);
        assert!(pushes[0].contains("$CODEBUILD_RESOLVED_SOURCE_VERSION"));
        assert!(pushes[1].contains("$CODEBUILD_BUILD_NUMBER"));
        assert!(pushes[2].starts_with(r#"if [ -n "${ENV_TAG:-}" ]"#));

        assert_eq!(spec.env.as_ref().unwrap().shell.as_deref(), Some("bash"));
        assert!(spec.to_yaml().is_ok());
    }

    #[test]
    fn test_image_definitions_format_matches_manifest() {
        // printf substitution as the build stage performs it
        let rendered = IMAGE_DEFINITIONS_FORMAT
            .replacen("%s", "hello", 1)
            .replacen("%s", "repo.example/hello:prod", 1);

        let manifest = ImageManifest::from_json(&rendered).unwrap();
        assert_eq!(manifest, ImageManifest::new("hello", "repo.example/hello", "prod"));
    }

    #[test]
    fn test_image_definitions_spec() {
        let spec = image_definitions("hello", "prod");
        let env = spec.env.as_ref().unwrap();

        assert_eq!(env.variables["CONTAINER_NAME"], "hello");
        assert_eq!(env.variables["IMAGE_TAG"], "prod");
        assert_eq!(
            spec.artifacts.as_ref().unwrap().files,
            vec!["imagedefinitions.json"]
        );
        assert!(
            spec.commands()
                .next()
                .unwrap()
                .ends_with("> imagedefinitions.json")
        );
    }

    #[test]
    fn test_synth_spec_publishes_assembly() {
        let spec = synth("dockyard.out");
        let artifacts = spec.artifacts.as_ref().unwrap();
        assert_eq!(artifacts.base_directory.as_deref(), Some("dockyard.out"));
        assert!(
            spec.commands()
                .any(|c| c == "dockyard synth --out dockyard.out")
        );
    }
}
