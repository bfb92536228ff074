// Constants and status codes

// Stack Status
//
// The original TypeScript dockge only distinguished five stack states.
// WorldView's §4.3 reduction needs the full StackStatus set from SPEC_FULL
// §3, so three more are added here rather than overloading an existing one.
pub const UNKNOWN: i32 = 0;
pub const CREATED_FILE: i32 = 1;
pub const CREATED_STACK: i32 = 2;
pub const RUNNING: i32 = 3;
pub const EXITED: i32 = 4;
pub const RUNNING_AND_EXITED: i32 = 5;
pub const UNHEALTHY: i32 = 6;
pub const INACTIVE: i32 = 7;

// Service-level container lifecycle reduction (§4.3 step 5). These are not
// exposed to the frontend directly; WorldView reduces them further into the
// stack-level ints above.
pub const SERVICE_UNHEALTHY: &str = "unhealthy";
pub const SERVICE_RUNNING: &str = "running";
pub const SERVICE_PAUSED: &str = "paused";
pub const SERVICE_CREATED: &str = "created";
pub const SERVICE_EXITED: &str = "exited";

// Compose labels recognised by StackIndex (§4.2)
pub const LABEL_PROJECT: &str = "com.docker.compose.project";
pub const LABEL_SERVICE: &str = "com.docker.compose.service";
pub const LABEL_STATUS_IGNORE: &str = "dockru.status.ignore";
pub const LABEL_IMAGEUPDATES_CHECK: &str = "dockru.imageupdates.check";
pub const LABEL_IMAGEUPDATES_CHANGELOG: &str = "dockru.imageupdates.changelog";
pub const LABEL_URLS_PREFIX: &str = "dockru.urls.";

// Terminal dimensions
pub const TERMINAL_COLS: u16 = 105;
pub const TERMINAL_ROWS: u16 = 10;
pub const PROGRESS_TERMINAL_ROWS: u16 = 8;
pub const COMBINED_TERMINAL_COLS: u16 = 58;
pub const COMBINED_TERMINAL_ROWS: u16 = 20;

// Error types
#[allow(dead_code)]
pub const ERROR_TYPE_VALIDATION: i32 = 1;

// Special endpoint marker
pub const ALL_ENDPOINTS: &str = "##ALL_DOCKRU_ENDPOINTS##";

// Accepted compose file names (in order of preference)
pub const ACCEPTED_COMPOSE_FILE_NAMES: &[&str] = &[
    "compose.yaml",
    "docker-compose.yaml",
    "docker-compose.yml",
    "compose.yml",
];

/// Convert status code to status name
#[allow(dead_code)]
pub fn status_name(status: i32) -> &'static str {
    match status {
        CREATED_FILE => "created_file",
        CREATED_STACK => "created_stack",
        RUNNING => "running",
        RUNNING_AND_EXITED => "running_and_exited",
        UNHEALTHY => "unhealthy",
        EXITED => "exited",
        INACTIVE => "inactive",
        _ => "unknown",
    }
}

/// Convert status code to short status name
#[allow(dead_code)]
pub fn status_name_short(status: i32) -> &'static str {
    match status {
        CREATED_FILE => "inactive",
        CREATED_STACK => "inactive",
        RUNNING => "active",
        RUNNING_AND_EXITED => "active",
        UNHEALTHY => "unhealthy",
        EXITED => "exited",
        INACTIVE => "inactive",
        _ => "?",
    }
}

/// Get color for status code
#[allow(dead_code)]
pub fn status_color(status: i32) -> &'static str {
    match status {
        CREATED_FILE => "dark",
        CREATED_STACK => "dark",
        RUNNING => "primary",
        RUNNING_AND_EXITED => "warning",
        UNHEALTHY => "danger",
        EXITED => "danger",
        INACTIVE => "secondary",
        _ => "secondary",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_name() {
        assert_eq!(status_name(RUNNING), "running");
        assert_eq!(status_name(EXITED), "exited");
        assert_eq!(status_name(CREATED_FILE), "draft");
        assert_eq!(status_name(UNKNOWN), "unknown");
    }

    #[test]
    fn test_status_name_short() {
        assert_eq!(status_name_short(RUNNING), "active");
        assert_eq!(status_name_short(EXITED), "exited");
        assert_eq!(status_name_short(CREATED_FILE), "inactive");
    }

    #[test]
    fn test_status_color() {
        assert_eq!(status_color(RUNNING), "primary");
        assert_eq!(status_color(EXITED), "danger");
        assert_eq!(status_color(CREATED_FILE), "dark");
    }
}
