//! 访问策略引擎
//!
//! 纯谓词函数，只消费已经加载好的实体关系，不做任何 I/O。
//! 每个 `can_*` 返回布尔值，配套的 `ensure_*` 在拒绝时返回 Forbidden，
//! 由调用方决定用哪一种。所有端点统一走这里，不在各处重复判定逻辑。

use crate::common::{MembershipType, RequestStatus};
use crate::error::AppError;
use crate::middleware::AuthUser;
use crate::routes::activity::model::Activity;
use crate::routes::group::model::{Group, Membership};
use crate::routes::post::model::Post;

/// 群组及请求者在其中的成员关系（没有行时为 None）
#[derive(Debug, Clone, Copy)]
pub struct GroupAccess<'a> {
    pub group: &'a Group,
    pub membership: Option<&'a Membership>,
}

impl<'a> GroupAccess<'a> {
    pub fn new(group: &'a Group, membership: Option<&'a Membership>) -> Self {
        Self { group, membership }
    }

    fn is_owner(&self, user: &AuthUser) -> bool {
        self.group.user_uuid == Some(user.user_id)
    }

    fn has_approved_membership(&self) -> bool {
        self.membership
            .is_some_and(|m| m.status == RequestStatus::Approved)
    }

    /// 群主没有成员行也始终按管理员对待
    fn is_admin(&self, user: &AuthUser) -> bool {
        self.is_owner(user)
            || self.membership.is_some_and(|m| {
                m.status == RequestStatus::Approved && m.membership_type == MembershipType::Admin
            })
    }
}

/// 帖子可见性判定所需的全部已加载关系
#[derive(Debug, Clone, Copy, Default)]
pub struct PostAccess<'a> {
    /// 帖子所属群组
    pub group: Option<GroupAccess<'a>>,
    /// 帖子所属活动
    pub activity: Option<&'a Activity>,
    /// 活动所属群组
    pub activity_group: Option<GroupAccess<'a>>,
    /// 请求者对该活动的活跃报名状态
    pub request_status: Option<RequestStatus>,
}

/// 群组"内部"访问：群主或已批准成员
pub fn has_group_access(user: &AuthUser, access: GroupAccess<'_>) -> bool {
    access.is_owner(user) || access.has_approved_membership()
}

pub fn can_view_group(user: &AuthUser, access: GroupAccess<'_>) -> bool {
    access.has_approved_membership()
        || access.is_owner(user)
        || (access.group.is_public && !access.group.needs_approval)
}

pub fn can_edit_group(user: &AuthUser, access: GroupAccess<'_>) -> bool {
    access.is_admin(user)
}

/// 活动可见：超级用户、创建者、公开活动、或对所属群组有访问权
///
/// 群组缺失（未关联或已删除）时按无群组算 false，不报错
pub fn can_view_activity(
    user: &AuthUser,
    activity: &Activity,
    group: Option<GroupAccess<'_>>,
) -> bool {
    user.is_superuser
        || activity.user_uuid == user.user_id
        || activity.is_public
        || group.is_some_and(|access| has_group_access(user, access))
}

/// 只有创建者能改活动，群组管理员没有越权编辑权
pub fn can_edit_activity(user: &AuthUser, activity: &Activity) -> bool {
    activity.user_uuid == user.user_id
}

pub fn can_view_post(user: &AuthUser, post: &Post, access: PostAccess<'_>) -> bool {
    if post.user_uuid == user.user_id {
        return true;
    }

    if let Some(group) = access.group {
        return has_group_access(user, group);
    }

    if let Some(activity) = access.activity {
        return activity.user_uuid == user.user_id
            || activity.is_public
            || matches!(
                access.request_status,
                Some(RequestStatus::Approved) | Some(RequestStatus::Pending)
            )
            || access
                .activity_group
                .is_some_and(|g| has_group_access(user, g));
    }

    // 不挂群组也不挂活动的帖子只有作者自己可见
    false
}

/// 删除比可见更严格：群组帖要管理员或群主，活动帖要活动创建者
/// 或活动所属群组的管理员
pub fn can_delete_post(user: &AuthUser, post: &Post, access: PostAccess<'_>) -> bool {
    if let Some(group) = access.group {
        return group.is_admin(user);
    }

    if let Some(activity) = access.activity {
        return activity.user_uuid == user.user_id
            || access.activity_group.is_some_and(|g| g.is_admin(user));
    }

    post.user_uuid == user.user_id
}

pub fn ensure_can_view_group(user: &AuthUser, access: GroupAccess<'_>) -> Result<(), AppError> {
    if can_view_group(user, access) {
        Ok(())
    } else {
        Err(AppError::Forbidden("no access to this group"))
    }
}

pub fn ensure_can_edit_group(user: &AuthUser, access: GroupAccess<'_>) -> Result<(), AppError> {
    if can_edit_group(user, access) {
        Ok(())
    } else {
        Err(AppError::Forbidden("only the group owner or an admin can do this"))
    }
}

pub fn ensure_can_view_activity(
    user: &AuthUser,
    activity: &Activity,
    group: Option<GroupAccess<'_>>,
) -> Result<(), AppError> {
    if can_view_activity(user, activity, group) {
        Ok(())
    } else {
        Err(AppError::Forbidden("no access to this activity"))
    }
}

pub fn ensure_can_edit_activity(user: &AuthUser, activity: &Activity) -> Result<(), AppError> {
    if can_edit_activity(user, activity) {
        Ok(())
    } else {
        Err(AppError::Forbidden("only the activity owner can do this"))
    }
}

pub fn ensure_can_view_post(
    user: &AuthUser,
    post: &Post,
    access: PostAccess<'_>,
) -> Result<(), AppError> {
    if can_view_post(user, post, access) {
        Ok(())
    } else {
        Err(AppError::Forbidden("no access to this post"))
    }
}

pub fn ensure_can_delete_post(
    user: &AuthUser,
    post: &Post,
    access: PostAccess<'_>,
) -> Result<(), AppError> {
    if can_delete_post(user, post, access) {
        Ok(())
    } else {
        Err(AppError::Forbidden("not allowed to delete this post"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn user() -> AuthUser {
        AuthUser {
            user_id: Uuid::new_v4(),
            is_superuser: false,
        }
    }

    fn superuser() -> AuthUser {
        AuthUser {
            user_id: Uuid::new_v4(),
            is_superuser: true,
        }
    }

    fn group(owner: Option<Uuid>, is_public: bool, needs_approval: bool) -> Group {
        Group {
            uuid: Uuid::new_v4(),
            title: "Climbing club".into(),
            description: None,
            is_public,
            needs_approval,
            user_uuid: owner,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            is_deleted: false,
        }
    }

    fn membership(
        group: &Group,
        user: &AuthUser,
        status: RequestStatus,
        membership_type: MembershipType,
    ) -> Membership {
        Membership {
            uuid: Uuid::new_v4(),
            group_uuid: group.uuid,
            user_uuid: user.user_id,
            status,
            membership_type,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            is_deleted: false,
        }
    }

    fn activity(owner: Uuid, is_public: bool, group_uuid: Option<Uuid>) -> Activity {
        Activity {
            uuid: Uuid::new_v4(),
            title: "Bouldering session".into(),
            description: None,
            time: Utc::now(),
            duration: 90,
            address_uuid: None,
            group_uuid,
            activity_type_uuid: None,
            user_uuid: owner,
            is_public,
            needs_approval: true,
            is_group: false,
            max_attendees: None,
            price: None,
            currency: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            is_deleted: false,
        }
    }

    fn post(author: Uuid, group_uuid: Option<Uuid>, activity_uuid: Option<Uuid>) -> Post {
        Post {
            uuid: Uuid::new_v4(),
            body: "hello".into(),
            user_uuid: author,
            group_uuid,
            activity_uuid,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            is_deleted: false,
        }
    }

    // ------------------------------------------------------------------
    // 群组谓词
    // ------------------------------------------------------------------

    #[test]
    fn group_owner_can_view_and_edit() {
        let owner = user();
        let g = group(Some(owner.user_id), false, true);
        let access = GroupAccess::new(&g, None);

        assert!(can_view_group(&owner, access));
        assert!(can_edit_group(&owner, access));
    }

    #[test]
    fn approved_member_can_view_but_not_edit() {
        let viewer = user();
        let g = group(Some(Uuid::new_v4()), false, true);
        let m = membership(&g, &viewer, RequestStatus::Approved, MembershipType::Participant);
        let access = GroupAccess::new(&g, Some(&m));

        assert!(can_view_group(&viewer, access));
        assert!(!can_edit_group(&viewer, access));
    }

    #[test]
    fn pending_member_cannot_view_private_group() {
        let viewer = user();
        let g = group(Some(Uuid::new_v4()), false, true);
        let m = membership(&g, &viewer, RequestStatus::Pending, MembershipType::Participant);

        assert!(!can_view_group(&viewer, GroupAccess::new(&g, Some(&m))));
    }

    #[test]
    fn open_public_group_is_visible_to_strangers() {
        let viewer = user();
        // public 且不需要审批才对外可见
        let open = group(Some(Uuid::new_v4()), true, false);
        let gated = group(Some(Uuid::new_v4()), true, true);

        assert!(can_view_group(&viewer, GroupAccess::new(&open, None)));
        assert!(!can_view_group(&viewer, GroupAccess::new(&gated, None)));
    }

    #[test]
    fn approved_admin_member_can_edit() {
        let admin = user();
        let g = group(Some(Uuid::new_v4()), false, true);
        let m = membership(&g, &admin, RequestStatus::Approved, MembershipType::Admin);

        assert!(can_edit_group(&admin, GroupAccess::new(&g, Some(&m))));

        // pending 的管理员行不算数
        let pending = membership(&g, &admin, RequestStatus::Pending, MembershipType::Admin);
        assert!(!can_edit_group(&admin, GroupAccess::new(&g, Some(&pending))));
    }

    #[test]
    fn ownerless_group_still_works() {
        let viewer = user();
        let g = group(None, true, false);

        assert!(can_view_group(&viewer, GroupAccess::new(&g, None)));
        assert!(!can_edit_group(&viewer, GroupAccess::new(&g, None)));
    }

    // ------------------------------------------------------------------
    // 活动谓词
    // ------------------------------------------------------------------

    #[test]
    fn private_activity_is_hidden_from_strangers() {
        let viewer = user();
        let a = activity(Uuid::new_v4(), false, None);

        assert!(!can_view_activity(&viewer, &a, None));
    }

    #[test]
    fn public_activity_is_visible_to_anyone() {
        let viewer = user();
        let a = activity(Uuid::new_v4(), true, None);

        assert!(can_view_activity(&viewer, &a, None));
    }

    #[test]
    fn owner_and_superuser_see_private_activity() {
        let owner = user();
        let a = activity(owner.user_id, false, None);

        assert!(can_view_activity(&owner, &a, None));
        assert!(can_view_activity(&superuser(), &a, None));
    }

    #[test]
    fn group_member_sees_private_group_activity() {
        let viewer = user();
        let g = group(Some(Uuid::new_v4()), false, true);
        let a = activity(Uuid::new_v4(), false, Some(g.uuid));
        let m = membership(&g, &viewer, RequestStatus::Approved, MembershipType::Participant);

        assert!(can_view_activity(
            &viewer,
            &a,
            Some(GroupAccess::new(&g, Some(&m)))
        ));
        assert!(!can_view_activity(
            &viewer,
            &a,
            Some(GroupAccess::new(&g, None))
        ));
    }

    #[test]
    fn view_is_monotonic_under_increasing_privilege() {
        // 先以无特权身份拿到 true，再授予成员关系 / 所有权，结论不得翻转
        let viewer = user();
        let g = group(Some(Uuid::new_v4()), false, true);
        let a = activity(Uuid::new_v4(), true, Some(g.uuid));

        assert!(can_view_activity(&viewer, &a, None));

        let m = membership(&g, &viewer, RequestStatus::Approved, MembershipType::Participant);
        assert!(can_view_activity(
            &viewer,
            &a,
            Some(GroupAccess::new(&g, Some(&m)))
        ));

        let mut owned = activity(viewer.user_id, true, Some(g.uuid));
        owned.is_public = a.is_public;
        assert!(can_view_activity(&viewer, &owned, None));
    }

    #[test]
    fn only_the_owner_edits_an_activity() {
        let owner = user();
        let admin = user();
        let a = activity(owner.user_id, true, None);

        assert!(can_edit_activity(&owner, &a));
        // 群组管理员也不行，编辑权只认创建者
        assert!(!can_edit_activity(&admin, &a));
    }

    // ------------------------------------------------------------------
    // 帖子谓词
    // ------------------------------------------------------------------

    #[test]
    fn author_always_sees_own_post() {
        let author = user();
        let p = post(author.user_id, None, None);

        assert!(can_view_post(&author, &p, PostAccess::default()));
    }

    #[test]
    fn scopeless_post_is_private_to_author() {
        let viewer = user();
        let p = post(Uuid::new_v4(), None, None);

        assert!(!can_view_post(&viewer, &p, PostAccess::default()));
    }

    #[test]
    fn group_post_needs_membership_to_view_and_admin_to_delete() {
        let viewer = user();
        let g = group(Some(Uuid::new_v4()), true, false);
        let p = post(Uuid::new_v4(), Some(g.uuid), None);

        let stranger = PostAccess {
            group: Some(GroupAccess::new(&g, None)),
            ..Default::default()
        };
        assert!(!can_view_post(&viewer, &p, stranger));
        assert!(!can_delete_post(&viewer, &p, stranger));

        let m = membership(&g, &viewer, RequestStatus::Approved, MembershipType::Participant);
        let member = PostAccess {
            group: Some(GroupAccess::new(&g, Some(&m))),
            ..Default::default()
        };
        assert!(can_view_post(&viewer, &p, member));
        assert!(!can_delete_post(&viewer, &p, member));

        let admin_row = membership(&g, &viewer, RequestStatus::Approved, MembershipType::Admin);
        let admin = PostAccess {
            group: Some(GroupAccess::new(&g, Some(&admin_row))),
            ..Default::default()
        };
        assert!(can_delete_post(&viewer, &p, admin));
    }

    #[test]
    fn activity_post_visibility_follows_activity_rules() {
        let viewer = user();
        let private = activity(Uuid::new_v4(), false, None);
        let p = post(Uuid::new_v4(), None, Some(private.uuid));

        let no_relation = PostAccess {
            activity: Some(&private),
            ..Default::default()
        };
        assert!(!can_view_post(&viewer, &p, no_relation));

        // pending 报名也足以看到活动帖
        let with_request = PostAccess {
            activity: Some(&private),
            request_status: Some(RequestStatus::Pending),
            ..Default::default()
        };
        assert!(can_view_post(&viewer, &p, with_request));

        let denied = PostAccess {
            activity: Some(&private),
            request_status: Some(RequestStatus::Denied),
            ..Default::default()
        };
        assert!(!can_view_post(&viewer, &p, denied));
    }

    #[test]
    fn activity_post_deletion_requires_owner_or_group_admin() {
        let viewer = user();
        let owner = user();
        let g = group(Some(Uuid::new_v4()), false, true);
        let a = activity(owner.user_id, true, Some(g.uuid));
        let p = post(viewer.user_id, None, Some(a.uuid));

        // 连作者自己都删不掉活动帖，除非是活动创建者或群组管理员
        let author_access = PostAccess {
            activity: Some(&a),
            request_status: Some(RequestStatus::Approved),
            ..Default::default()
        };
        assert!(!can_delete_post(&viewer, &p, author_access));

        let owner_access = PostAccess {
            activity: Some(&a),
            ..Default::default()
        };
        assert!(can_delete_post(&owner, &p, owner_access));

        let admin_row = membership(&g, &viewer, RequestStatus::Approved, MembershipType::Admin);
        let admin_access = PostAccess {
            activity: Some(&a),
            activity_group: Some(GroupAccess::new(&g, Some(&admin_row))),
            ..Default::default()
        };
        assert!(can_delete_post(&viewer, &p, admin_access));
    }

    #[test]
    fn ensure_variants_surface_forbidden() {
        let viewer = user();
        let a = activity(Uuid::new_v4(), false, None);

        assert!(matches!(
            ensure_can_view_activity(&viewer, &a, None),
            Err(AppError::Forbidden(_))
        ));
        assert!(matches!(
            ensure_can_edit_activity(&viewer, &a),
            Err(AppError::Forbidden(_))
        ));
    }
}
