use crate::core::context::configuration::{Configuration, Profile};
use crate::core::context::environment::VariablesResolver;
use crate::core::Error;

pub mod configuration;
pub mod environment;

#[derive(Clone, Debug)]
pub struct Context {
    pub configuration: Configuration,
}

impl Context {
    pub fn new(configuration: Configuration) -> Context {
        Context { configuration }
    }

    /// Builds the configuration from, in increasing precedence, the profile file, the
    /// `GASPROBE_` environment variables and the `--name=value` overrides.
    pub fn load(profile: Option<&str>, overrides: &[String]) -> Result<Self, Error> {
        let mut complete_profile = Profile::empty();

        let resolver = VariablesResolver::initialize();
        let environment = resolver.resolve_environment()?;
        let arguments = resolver.resolve_arguments(overrides)?;

        let profile_path = profile
            .or_else(|| environment.get("profile").and_then(|x| x.as_str()))
            .filter(|x| !x.is_empty());

        let profile = profile_path.map(Profile::from_file).unwrap_or(Ok(Profile::empty()))?;

        complete_profile.merge(&profile);
        complete_profile.insert_variables(environment)?;
        complete_profile.insert_variables(arguments)?;

        Configuration::from_profile(&complete_profile).map(Self::new)
    }
}
