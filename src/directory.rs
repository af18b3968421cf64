use dashmap::DashMap;
use ulid::Ulid;

/// Closed role set. Authorization decisions match on this, never on strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Mentor,
    Student,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Mentor => "mentor",
            Role::Student => "student",
            Role::Admin => "admin",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub id: Ulid,
    pub role: Role,
    pub login: String,
    pub name: String,
}

/// Identity directory: maps a connection's login to a mentor or student
/// record. The admin login is fixed at construction and never stored.
pub struct Directory {
    principals: DashMap<Ulid, Principal>,
    by_login: DashMap<String, Ulid>,
    admin_login: String,
}

impl Directory {
    pub fn new(admin_login: String) -> Self {
        Self {
            principals: DashMap::new(),
            by_login: DashMap::new(),
            admin_login,
        }
    }

    /// Resolve a caller token (the connection user) to a principal.
    pub fn resolve(&self, login: &str) -> Option<Principal> {
        if login == self.admin_login {
            return Some(Principal {
                id: Ulid::nil(),
                role: Role::Admin,
                login: login.to_string(),
                name: "administrator".to_string(),
            });
        }
        let id = *self.by_login.get(login)?.value();
        self.principals.get(&id).map(|p| p.value().clone())
    }

    pub fn get(&self, id: Ulid) -> Option<Principal> {
        self.principals.get(&id).map(|p| p.value().clone())
    }

    pub fn contains(&self, id: Ulid) -> bool {
        self.principals.contains_key(&id)
    }

    pub fn login_taken(&self, login: &str) -> bool {
        login == self.admin_login || self.by_login.contains_key(login)
    }

    pub fn len(&self) -> usize {
        self.principals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.principals.is_empty()
    }

    /// Insert a registered principal. Uniqueness checks happen at the
    /// operation layer before the registration event is committed.
    pub fn insert(&self, principal: Principal) {
        self.by_login
            .insert(principal.login.clone(), principal.id);
        self.principals.insert(principal.id, principal);
    }

    pub fn iter_principals(&self) -> Vec<Principal> {
        self.principals.iter().map(|e| e.value().clone()).collect()
    }
}
