//! Mirror URLs

/// Maven Central repository, used for libraries that only declare coordinates
pub const MAVEN_CENTRAL: &str = "https://repo1.maven.org/maven2";
