//-
// Copyright (c) 2026, the Maildirquota developers
//
// This file is part of Maildirquota.
//
// Maildirquota is free software: you can redistribute it and/or modify it
// under the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// Maildirquota is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or
// FITNESS FOR A PARTICULAR PURPOSE. See the GNU General Public License for
// more details.
//
// You should have received a copy of the GNU General Public License along with
// Maildirquota. If not, see <http://www.gnu.org/licenses/>.

/// Determine whether the given Maildir++ folder name is "safe".
///
/// Folder `Name` lives in the directory `.Name` under the mailbox root, so
/// the name must not be able to escape the root or collide with the maildir
/// structure itself. Periods are allowed inside the name since Maildir++ uses
/// them as the hierarchy separator, but not at either end, and not doubled.
pub fn is_safe_folder_name(name: &str) -> bool {
    !name.is_empty() &&
        !name.starts_with('.') &&
        !name.ends_with('.') &&
        !name.contains("..") &&
        name.find('/').is_none() &&
        // Only a path separator on Windows, but always block since it has high
        // potential of causing problems
        name.find('\\').is_none() &&
        // Don't allow any ASCII control characters
        name.find(|c| c < ' ' || c == '\x7F').is_none()
}

#[cfg(test)]
mod test {
    use super::is_safe_folder_name;

    #[test]
    fn test_is_safe_folder_name() {
        assert!(is_safe_folder_name("Trash"));
        assert!(is_safe_folder_name("Entwürfe"));
        assert!(is_safe_folder_name("郵便"));
        assert!(is_safe_folder_name("Archive.2020"));
        assert!(is_safe_folder_name("folder #1"));
        assert!(!is_safe_folder_name(""));
        assert!(!is_safe_folder_name("."));
        assert!(!is_safe_folder_name(".."));
        assert!(!is_safe_folder_name(".hidden"));
        assert!(!is_safe_folder_name("trailing."));
        assert!(!is_safe_folder_name("a..b"));
        assert!(!is_safe_folder_name("foo/bar"));
        assert!(!is_safe_folder_name("foo\\bar"));
        assert!(!is_safe_folder_name("foo\0"));
        assert!(!is_safe_folder_name("fo\x7Fo"));
    }
}
